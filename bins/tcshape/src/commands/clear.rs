//! tcshape clear command implementation.

use clap::Args;
use tcshape::rate::RateUnit;
use tcshape::ShaperConfig;

use crate::output::{OutputFormat, OutputOptions, print_json, report_json, warn_failures};

#[derive(Args)]
pub struct ClearCmd {
    /// Device name.
    #[arg(value_name = "DEV")]
    dev: String,
}

impl ClearCmd {
    pub async fn run(
        self,
        config: &ShaperConfig,
        format: OutputFormat,
        opts: &OutputOptions,
    ) -> anyhow::Result<()> {
        let shaper = super::shaper(config, &self.dev)?;
        let report = shaper.clear(&self.dev).await?;

        match format {
            OutputFormat::Json => print_json(&report_json(&report), opts)?,
            OutputFormat::Text => {
                warn_failures(&report);
                let status = shaper
                    .status_reader()
                    .query(&self.dev, RateUnit::default())
                    .await?;
                println!("{}", status);
            }
        }

        Ok(())
    }
}
