//! checksql - compile-checks stored SQL fragments against a test schema.

use checksql::catalog::Catalog;
use checksql::cli::Cli;
use checksql::config::Settings;
use checksql::db::{OwnerSource, PgOwnerSource, PgTestTarget, TestTarget};
use checksql::error::{CheckError, Result};
use checksql::logging::{init_file_logging, init_stderr_logging};
use checksql::neutralize::RuleRegistry;
use checksql::scan::{Scanner, PROGRESS_TARGET};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse_args();

    match cli.log_path() {
        Some(path) => init_file_logging(&path),
        None => init_stderr_logging(),
    }

    if let Err(e) = run(cli).await {
        error!("{}: {}", e.category(), e);
        if matches!(e, CheckError::Config(_)) {
            eprintln!("{e}");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let owner_config = cli.owner_config()?;
    let test_config = cli.test_config()?;
    let role = cli.target_role();

    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let settings = Settings::load_from_file(&config_path)?;

    let mut catalog = match cli.catalog_path(&settings) {
        Some(path) => {
            info!("Loading catalog from: {}", path.display());
            Catalog::load_from_file(&path)?
        }
        None => Catalog::builtin(),
    };
    catalog.disable_tables(&settings.catalog.disabled_tables);

    info!("Owner: {}", owner_config.display_string());
    let owner = PgOwnerSource::connect(&owner_config, &settings.check).await?;

    let target_config = test_config.as_ref().unwrap_or(&owner_config);
    info!("Test: {}", target_config.display_string());
    let target = match PgTestTarget::connect(target_config, &settings.check).await {
        Ok(target) => target,
        Err(e) => {
            if let Err(close_err) = owner.close().await {
                warn!("Closing owner connection: {}", close_err);
            }
            return Err(e);
        }
    };

    let registry = RuleRegistry::builtin();
    let cancel = CancellationToken::new();
    let mut scanner = Scanner::new(&owner, &target, &registry, &settings.check, role)
        .with_cancellation(cancel.clone());

    if cli.drop_only {
        scanner.drop_transient_objects().await;
        info!(target: PROGRESS_TARGET, "Transient objects dropped");
    } else {
        let signal_token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current row");
                signal_token.cancel();
            }
        });

        let aggregator = scanner.run(&catalog).await;
        aggregator.log_summary();
    }

    if let Err(e) = target.close().await {
        warn!("Closing test connection: {}", e);
    }
    owner.close().await?;
    Ok(())
}
