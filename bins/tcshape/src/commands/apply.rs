//! tcshape apply command implementation.

use clap::{ArgGroup, Args};
use tcshape::rate::{self, RateUnit};
use tcshape::shaper::Limits;
use tcshape::ShaperConfig;

use crate::output::{OutputFormat, OutputOptions, print_json, report_json, warn_failures};

#[derive(Args)]
#[command(group(
    ArgGroup::new("limits")
        .required(true)
        .multiple(true)
        .args(["rate", "upload", "download"])
))]
pub struct ApplyCmd {
    /// Device name.
    #[arg(value_name = "DEV")]
    dev: String,

    /// Same limit for upload and download.
    #[arg(short, long, value_name = "N", conflicts_with_all = ["upload", "download"])]
    rate: Option<String>,

    /// Upload (egress) limit.
    #[arg(long, value_name = "N")]
    upload: Option<String>,

    /// Download (ingress) limit.
    #[arg(long, value_name = "N")]
    download: Option<String>,

    /// Unit of the given rates (b, kib, mib).
    #[arg(short, long, default_value = "mib")]
    unit: RateUnit,
}

impl ApplyCmd {
    pub async fn run(
        self,
        config: &ShaperConfig,
        format: OutputFormat,
        opts: &OutputOptions,
    ) -> anyhow::Result<()> {
        let limits = self.limits()?;
        let shaper = super::shaper(config, &self.dev)?;

        let report = shaper.apply_limits(&self.dev, limits).await?;
        let status = shaper.status_reader().query(&self.dev, self.unit).await?;

        match format {
            OutputFormat::Json => {
                let mut value = report_json(&report);
                value["status"] = serde_json::to_value(status)?;
                print_json(&value, opts)?;
            }
            OutputFormat::Text => {
                warn_failures(&report);
                println!("{}", status);
            }
        }

        Ok(())
    }

    fn limits(&self) -> tcshape::Result<Limits> {
        let parse = |text: &Option<String>| {
            text.as_deref()
                .map(|t| rate::to_kbit(t, self.unit))
                .transpose()
        };

        if let Some(kbit) = parse(&self.rate)? {
            return Ok(Limits::both(kbit));
        }

        Ok(Limits {
            upload: parse(&self.upload)?,
            download: parse(&self.download)?,
        })
    }
}
