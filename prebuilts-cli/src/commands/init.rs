//! `prebuilts init [--root DIR] [--force]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use prebuilts_core::manifest;

/// Write the default manifest.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Checkout root that receives prebuilts.yaml.
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub root: PathBuf,

    /// Overwrite an existing manifest with the default one.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let existed = manifest::manifest_path_at(&self.root).exists();
        let (manifest, path) = manifest::init_at(&self.root, self.force)
            .with_context(|| format!("failed to init manifest under '{}'", self.root.display()))?;

        if existed && !self.force {
            println!("✓ Manifest already present: {}", path.display());
            println!("  Use --force to replace it with the default.");
            return Ok(());
        }

        println!("✓ Wrote default manifest to {}", path.display());
        for (batch, dest) in &manifest.destinations {
            let count = manifest.artifacts_for(*batch).len();
            println!(
                "  {:<14} → {} ({count} artifact(s))",
                batch.as_str(),
                dest.display()
            );
        }
        Ok(())
    }
}
