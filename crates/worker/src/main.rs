use sendflow::api;
use sendflow::config;
use sendflow::db;
use sendflow::queue::maintenance::sweep_stale_processing;
use sendflow::queue::{SendEngine, SendSettings, TickOutcome, TickOptions};
use sendflow::telemetry;

use std::time::Duration;
use tracing::{debug, error, info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing(telemetry::DEFAULT_FILTER);

    let cfg = config::Config::from_env()?;
    let api_addr = cfg.admin_addr.clone();

    info!(
        worker_id = %cfg.worker_id,
        api = api_addr.as_deref().unwrap_or("disabled"),
        cron_auth = if cfg.cron_secret.is_some() { "enabled" } else { "disabled" },
        scheduler = cfg.scheduler_enabled,
        dry_run = cfg.dry_run,
        stale_processing_minutes = cfg.stale_processing_minutes,
        auto_retry_max = cfg.auto_retry_max,
        utc_offset_hours = cfg.utc_offset_hours,
        "sendflow worker starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let engine = SendEngine::from_config(&cfg, pool)?;

    // ---- API task ----
    let app = api::router(api::ApiState {
        engine: engine.clone(),
        cron_secret: cfg.cron_secret.clone(),
    });

    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("admin api listening on http://{addr}");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Stale-processing sweep ----
    let sweep_handle = {
        let engine = engine.clone();
        let after_minutes = cfg.stale_processing_minutes;
        tokio::spawn(async move {
            if after_minutes <= 0 {
                std::future::pending::<()>().await;
            }
            loop {
                match sweep_stale_processing(&engine, after_minutes).await {
                    Ok(swept) if !swept.is_empty() => warn!(
                        failed = swept.failed_items.len(),
                        released = swept.released_drafts.len(),
                        "[sweep] stale work cleaned up"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "[sweep] error"),
                }
                tokio::time::sleep(SWEEP_INTERVAL).await;
            }
            #[allow(unreachable_code)]
            Ok::<(), anyhow::Error>(())
        })
    };

    // ---- Scheduled tick ----
    let scheduler_enabled = cfg.scheduler_enabled;
    let tick_handle = tokio::spawn(async move {
        if !scheduler_enabled {
            info!("scheduler disabled; ticks only via /cron/process-queue");
            std::future::pending::<()>().await;
        }

        loop {
            // interval is re-read every round so settings changes apply without restart
            let interval_minutes = match engine.send_settings().await {
                Ok(settings) => {
                    run_tick(&engine, &settings).await;
                    settings.interval_minutes
                }
                Err(e) => {
                    error!(error = %e, "[tick] could not load send settings");
                    SendSettings::default().interval_minutes
                }
            };

            let secs = interval_minutes.max(1) as u64 * 60;
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
        #[allow(unreachable_code)]
        Ok::<(), anyhow::Error>(())
    });

    tokio::select! {
        res = api_handle => res??,
        res = tick_handle => res??,
        res = sweep_handle => res??,
    }

    Ok(())
}

async fn run_tick(engine: &SendEngine, settings: &SendSettings) {
    match engine.tick(settings, TickOptions::default()).await {
        Ok(TickOutcome::Idle { .. }) => debug!("[tick] nothing to process"),
        Ok(outcome @ TickOutcome::Skipped { .. }) => {
            info!(message = outcome.message(), "[tick] skipped")
        }
        Ok(TickOutcome::Sent { id, email, budget }) => info!(
            queue_id = %id,
            to = %email,
            sent_today = budget.sent_today,
            daily_limit = budget.daily_limit,
            "[tick] sent"
        ),
        Ok(TickOutcome::Failed { id, error, .. }) => {
            warn!(queue_id = %id, %error, "[tick] send failed")
        }
        Err(e) => error!(error = %e, "[tick] error"),
    }
}
