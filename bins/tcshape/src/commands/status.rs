//! tcshape status command implementation.

use std::time::Duration;

use clap::Args;
use tcshape::rate::RateUnit;
use tcshape::{LimiterStatus, ShaperConfig, StatusReader, SystemRunner};

use crate::output::{OutputFormat, OutputOptions, print_json};

#[derive(Args)]
pub struct StatusCmd {
    /// Device name.
    #[arg(value_name = "DEV")]
    dev: String,

    /// Display unit (b, kib, mib).
    #[arg(short, long, default_value = "mib")]
    unit: RateUnit,

    /// Re-read the status every SECS seconds until interrupted.
    #[arg(
        short,
        long,
        value_name = "SECS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    watch: Option<u64>,
}

impl StatusCmd {
    pub async fn run(
        self,
        config: &ShaperConfig,
        format: OutputFormat,
        opts: &OutputOptions,
    ) -> anyhow::Result<()> {
        let reader = StatusReader::with_config(config.runner(), config);

        let Some(secs) = self.watch else {
            let status = self.query(&reader).await?;
            return self.print(&status, format, opts);
        };

        let mut interval = tokio::time::interval(Duration::from_secs(secs));
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                _ = &mut ctrl_c => break,
                status = self.query(&reader) => self.print(&status?, format, opts)?,
            }
        }

        Ok(())
    }

    async fn query(&self, reader: &StatusReader<SystemRunner>) -> tcshape::Result<LimiterStatus> {
        reader.query(&self.dev, self.unit).await
    }

    fn print(
        &self,
        status: &LimiterStatus,
        format: OutputFormat,
        opts: &OutputOptions,
    ) -> anyhow::Result<()> {
        match format {
            OutputFormat::Json => {
                let mut value = serde_json::to_value(status)?;
                value["interface"] = self.dev.clone().into();
                value["text"] = status.to_string().into();
                print_json(&value, opts)?;
            }
            OutputFormat::Text => println!("{}", status),
        }
        Ok(())
    }
}
