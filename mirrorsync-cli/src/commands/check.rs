//! `mirrorsync check`: validate the configuration.

use anyhow::Result;
use clap::Args;

use crate::GlobalArgs;

/// Arguments for `mirrorsync check`.
#[derive(Args, Debug)]
pub struct CheckArgs {}

impl CheckArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let (path, config) = global.load()?;
        let g = &config.global;

        println!("configuration OK: {}", path.display());
        if let Some(addr) = g.listen_addr()? {
            println!("  listen   {addr}");
        }
        if let Some(fifo) = &g.fifo {
            println!("  fifo     {}", fifo.display());
        }
        let allow: Vec<String> = g.allow.0.iter().map(ToString::to_string).collect();
        println!("  allow    {}", allow.join(", "));
        println!("  mirrors  {}", config.mirrors.len());
        for (name, mirror) in &config.mirrors {
            println!(
                "    {name}  {}  ({} remote(s))",
                mirror.path.display(),
                mirror.remotes.len()
            );
        }
        Ok(())
    }
}
