//! Command-line interface for zvault.

use crate::config::BackupConfig;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use zvault_backup::{
    AwsCliStore, LineageBuilder, SyncConfig, SyncRunner, UnmatchedPolicy, Verdict, Verifier,
    VerifyConfig, ZfsSource,
};

#[derive(Parser)]
#[command(name = "zvault")]
#[command(about = "Verify and replicate ZFS snapshot backups in an object store", long_about = None)]
pub struct Cli {
    #[arg(short, long, env = "ZVAULT_BUCKET")]
    pub bucket: Option<String>,

    #[arg(short, long, env = "ZVAULT_POOL")]
    pub pool: Option<String>,

    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check every remote object against a locally recomputed digest.
    Verify {
        #[arg(long, env = "ZVAULT_CHUNK_SIZE_MB")]
        chunk_size_mb: Option<u64>,
        /// Abort the scan on the first remote object with no lineage
        /// entry, instead of counting it as a failure.
        #[arg(long)]
        strict: bool,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Upload every eligible snapshot the store is missing.
    Sync {
        #[arg(long, env = "ZVAULT_MAX_AGE_DAYS")]
        max_age_days: Option<u64>,
        #[arg(long)]
        storage_class: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Print the reconstructed snapshot lineage.
    Lineage,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = self.effective_config()?;
        match self.command {
            Command::Verify { chunk_size_mb, strict, ref prefix } => {
                self.verify(&config, chunk_size_mb, strict, prefix.clone()).await
            }
            Command::Sync { max_age_days, ref storage_class, ref prefix } => {
                self.sync(&config, max_age_days, storage_class.clone(), prefix.clone())
                    .await
            }
            Command::Lineage => self.lineage(&config).await,
        }
    }

    fn effective_config(&self) -> Result<BackupConfig> {
        let mut config = match &self.config {
            Some(path) => BackupConfig::from_file(path)?,
            None => BackupConfig::default(),
        };
        if let Some(bucket) = &self.bucket {
            config.bucket = bucket.clone();
        }
        if let Some(pool) = &self.pool {
            config.pool = pool.clone();
        }
        if config.bucket.is_empty() {
            anyhow::bail!("no bucket configured: pass --bucket or set ZVAULT_BUCKET");
        }
        if config.pool.is_empty() {
            anyhow::bail!("no pool configured: pass --pool or set ZVAULT_POOL");
        }
        Ok(config)
    }

    async fn verify(
        &self,
        config: &BackupConfig,
        chunk_size_mb: Option<u64>,
        strict: bool,
        prefix: Option<String>,
    ) -> Result<()> {
        let source = ZfsSource::new().with_sudo(config.use_sudo);
        let store = AwsCliStore::new(config.bucket.clone());

        let mut verify_config = VerifyConfig::new(config.pool.clone());
        verify_config.prefix = prefix.unwrap_or_else(|| config.prefix.clone());
        verify_config.default_chunk_mb = chunk_size_mb.unwrap_or(config.chunk_size_mb);
        if strict || config.strict_unmatched {
            verify_config.unmatched = UnmatchedPolicy::Abort;
        }

        let report = Verifier::new(&source, &store, verify_config).run().await?;

        for outcome in &report.outcomes {
            match &outcome.verdict {
                Verdict::ConfirmedByTag { .. } => {
                    println!("{} - OK (store tag set)", outcome.snapshot);
                }
                Verdict::ConfirmedComputed { .. } => {
                    println!("{} - OK (computed)", outcome.snapshot);
                }
                Verdict::SizeWarning { local, remote, ratio } => {
                    println!(
                        "{} - WARN checksum mismatch, but size estimate is {:.1}% of the remote object",
                        outcome.snapshot,
                        ratio * 100.0
                    );
                    println!("      local:{} remote:{}", local, remote);
                }
                Verdict::Mismatch { local, remote } => {
                    println!(
                        "{} - FAILURE local:{} remote:{}",
                        outcome.snapshot, local, remote
                    );
                }
                Verdict::Unmatched => {
                    println!("{} - FAILURE no matching local snapshot", outcome.snapshot);
                }
            }
        }

        if !report.is_clean() {
            println!("FAILURES DETECTED!");
            anyhow::bail!(
                "{} of {} objects failed verification",
                report.failures,
                report.outcomes.len()
            );
        }
        println!("{} objects verified", report.outcomes.len());
        Ok(())
    }

    async fn sync(
        &self,
        config: &BackupConfig,
        max_age_days: Option<u64>,
        storage_class: Option<String>,
        prefix: Option<String>,
    ) -> Result<()> {
        let source = ZfsSource::new().with_sudo(config.use_sudo);
        let store = AwsCliStore::new(config.bucket.clone());

        let sync_config = SyncConfig {
            pool: config.pool.clone(),
            prefix: prefix.unwrap_or_else(|| config.prefix.clone()),
            storage_class: Some(storage_class.unwrap_or_else(|| config.storage_class.clone())),
            max_age_days: max_age_days.or(config.max_age_days),
        };

        let report = SyncRunner::new(&source, &store, sync_config).run().await?;

        for (name, bytes) in &report.uploaded {
            println!("uploaded {} ({})", name, Self::format_bytes(*bytes));
        }
        println!(
            "{} uploaded, {} in sync, {} skipped by age cutoff",
            report.uploaded.len(),
            report.in_sync,
            report.skipped_age
        );
        Ok(())
    }

    async fn lineage(&self, config: &BackupConfig) -> Result<()> {
        let source = ZfsSource::new().with_sudo(config.use_sudo);
        let nodes = LineageBuilder::new(config.pool.as_str()).build(&source).await?;

        println!("{:<50} {:<12} {}", "SNAPSHOT", "KIND", "PARENT");
        println!("{}", "-".repeat(100));
        for node in &nodes {
            let (kind, parent) = match &node.parent {
                Some(parent) => ("incremental", parent.as_str()),
                None => ("full", "-"),
            };
            println!("{:<50} {:<12} {}", node.name, kind, parent);
        }
        println!("{} snapshots in lineage", nodes.len());
        Ok(())
    }

    fn format_bytes(bytes: u64) -> String {
        const KIB: u64 = 1024;
        const MIB: u64 = KIB * 1024;
        const GIB: u64 = MIB * 1024;
        const TIB: u64 = GIB * 1024;

        if bytes >= TIB {
            format!("{:.2} TiB", bytes as f64 / TIB as f64)
        } else if bytes >= GIB {
            format!("{:.2} GiB", bytes as f64 / GIB as f64)
        } else if bytes >= MIB {
            format!("{:.2} MiB", bytes as f64 / MIB as f64)
        } else if bytes >= KIB {
            format!("{:.2} KiB", bytes as f64 / KIB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_verify_subcommand() {
        let cli = Cli::parse_from(["zvault", "--bucket", "b", "--pool", "tank", "verify"]);
        match cli.command {
            Command::Verify { strict, .. } => assert!(!strict),
            _ => panic!("Expected Verify command"),
        }
        assert_eq!(cli.bucket.as_deref(), Some("b"));
        assert_eq!(cli.pool.as_deref(), Some("tank"));
    }

    #[test]
    fn test_cli_verify_strict_flag() {
        let cli = Cli::parse_from(["zvault", "verify", "--strict", "--chunk-size-mb", "64"]);
        match cli.command {
            Command::Verify { strict, chunk_size_mb, .. } => {
                assert!(strict);
                assert_eq!(chunk_size_mb, Some(64));
            }
            _ => panic!("Expected Verify command"),
        }
    }

    #[test]
    fn test_cli_sync_subcommand() {
        let cli = Cli::parse_from([
            "zvault",
            "sync",
            "--max-age-days",
            "60",
            "--storage-class",
            "GLACIER",
        ]);
        match cli.command {
            Command::Sync { max_age_days, storage_class, .. } => {
                assert_eq!(max_age_days, Some(60));
                assert_eq!(storage_class.as_deref(), Some("GLACIER"));
            }
            _ => panic!("Expected Sync command"),
        }
    }

    #[test]
    fn test_cli_lineage_subcommand() {
        let cli = Cli::parse_from(["zvault", "lineage"]);
        assert!(matches!(cli.command, Command::Lineage));
    }

    #[test]
    fn test_effective_config_requires_bucket_and_pool() {
        let cli = Cli::parse_from(["zvault", "verify"]);
        assert!(cli.effective_config().is_err());

        let cli = Cli::parse_from(["zvault", "--bucket", "b", "--pool", "tank", "verify"]);
        let config = cli.effective_config().unwrap();
        assert_eq!(config.bucket, "b");
        assert_eq!(config.pool, "tank");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(Cli::format_bytes(512), "512 B");
        assert_eq!(Cli::format_bytes(2048), "2.00 KiB");
        assert_eq!(Cli::format_bytes(5 * 1024 * 1024), "5.00 MiB");
    }
}
