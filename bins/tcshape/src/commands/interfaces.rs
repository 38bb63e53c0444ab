//! tcshape interfaces command implementation.

use clap::Args;
use serde_json::json;
use tcshape::{ShaperConfig, ifname};

use crate::output::{OutputFormat, OutputOptions, print_json};

#[derive(Args)]
pub struct InterfacesCmd {}

impl InterfacesCmd {
    pub fn run(
        self,
        config: &ShaperConfig,
        format: OutputFormat,
        opts: &OutputOptions,
    ) -> anyhow::Result<()> {
        let names = ifname::list_interfaces()?;

        match format {
            OutputFormat::Json => {
                let entries: Vec<_> = names
                    .iter()
                    .map(|name| {
                        json!({
                            "name": name,
                            "redirect": *name == config.ifb_device,
                        })
                    })
                    .collect();
                print_json(&json!(entries), opts)?;
            }
            OutputFormat::Text => {
                for name in &names {
                    if *name == config.ifb_device {
                        println!("{} (redirect device)", name);
                    } else {
                        println!("{}", name);
                    }
                }
            }
        }

        Ok(())
    }
}
