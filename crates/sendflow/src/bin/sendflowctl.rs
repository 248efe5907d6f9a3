use chrono::Utc;
use sendflow::config::Config;
use sendflow::db;
use sendflow::queue::maintenance::sweep_stale_processing;
use sendflow::queue::{
    BatchReport, Company, Draft, DraftStatus, SendEngine, SendSettings, SendStatus, Template,
    TickOptions,
};
use sendflow::store::{PgQueueStore, QueueFilter};
use sendflow::telemetry;
use std::env;
use uuid::Uuid;

const USAGE: &str = "sendflowctl <command>\n\
Commands:\n\
- migrate\n\
- reset\n\
- seed <n>\n\
- tick [--force]\n\
- send <queue_id>...\n\
- retry <queue_id>...\n\
- sweep [minutes]\n\
- settings [daily_limit interval_minutes [enabled]]\n\
- status\n\
\n\
Uses DATABASE_URL. SENDFLOW_DRY_RUN=1 logs instead of sending.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("warn,sendflow=info");

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let cfg = Config::from_env()?;
    let pool = db::make_pool(&cfg.database_url).await?;
    let store = PgQueueStore::new(pool.clone());

    match command.as_str() {
        "migrate" => {
            db::run_migrations(&pool).await?;
            println!("migrate OK");
        }
        "reset" => {
            store.reset().await?;
            println!("reset OK");
        }
        "seed" => {
            let n: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(5);
            let engine = SendEngine::from_config(&cfg, pool)?;
            seed(&store, &engine, n).await?;
        }
        "tick" => {
            let force = args.iter().skip(2).any(|a| a == "--force");
            let engine = SendEngine::from_config(&cfg, pool)?;
            let settings = engine.send_settings().await?;
            let outcome = engine.tick(&settings, TickOptions { force }).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        "send" | "retry" => {
            let ids = parse_ids(&args[2..])?;
            let engine = SendEngine::from_config(&cfg, pool)?;
            let report = if command == "send" {
                engine.send_queue_items(&ids).await?
            } else {
                engine.retry(&ids).await?
            };
            print_report(&report);
        }
        "sweep" => {
            let minutes: i64 = args
                .get(2)
                .and_then(|s| s.parse().ok())
                .unwrap_or(cfg.stale_processing_minutes);
            let engine = SendEngine::from_config(&cfg, pool)?;
            if minutes <= 0 {
                println!("sweep disabled (minutes <= 0)");
            } else {
                let swept = sweep_stale_processing(&engine, minutes).await?;
                println!("failed {} stale item(s)", swept.failed_items.len());
                for id in &swept.failed_items {
                    println!("  - {id}");
                }
                println!("released {} orphaned draft(s)", swept.released_drafts.len());
                for id in &swept.released_drafts {
                    println!("  - {id}");
                }
            }
        }
        "settings" => {
            let engine = SendEngine::from_config(&cfg, pool)?;
            let mut settings = engine.send_settings().await?;
            if let (Some(limit), Some(interval)) = (args.get(2), args.get(3)) {
                settings = SendSettings {
                    daily_limit: limit.parse()?,
                    interval_minutes: interval.parse()?,
                    enabled: match args.get(4) {
                        Some(v) => v.parse()?,
                        None => settings.enabled,
                    },
                };
                settings = engine.update_send_settings(settings).await?;
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        "status" => {
            let engine = SendEngine::from_config(&cfg, pool)?;
            let settings = engine.send_settings().await?;
            let budget = engine.budget(&settings).await?;
            let items = engine
                .list_queue(&QueueFilter {
                    limit: Some(500),
                    ..QueueFilter::default()
                })
                .await?;
            let count = |s: &str| items.iter().filter(|i| i.status.as_str() == s).count();
            println!(
                "queue: waiting={} processing={} complete={} failed={} (latest {})",
                count("waiting"),
                count("processing"),
                count("complete"),
                count("failed"),
                items.len()
            );
            println!(
                "today: sent={} limit={} remaining={} enabled={}",
                budget.sent_today,
                budget.daily_limit,
                budget.remaining(),
                settings.enabled
            );
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn parse_ids(raw: &[String]) -> anyhow::Result<Vec<Uuid>> {
    raw.iter()
        .map(|s| {
            s.parse::<Uuid>()
                .map_err(|e| anyhow::anyhow!("invalid id {s}: {e}"))
        })
        .collect()
}

fn print_report(report: &BatchReport) {
    println!(
        "success: {}, fail: {}",
        report.success_count, report.fail_count
    );
    for r in &report.results {
        match (&r.email, &r.error) {
            (_, Some(err)) => println!("  x {} {err}", r.id),
            (Some(email), None) => println!("  + {} {email}", r.id),
            (None, None) => println!("  + {}", r.id),
        }
    }
}

async fn seed(store: &PgQueueStore, engine: &SendEngine, n: usize) -> anyhow::Result<()> {
    store
        .insert_template(&Template {
            id: Uuid::new_v4(),
            name: "intro".into(),
            subject: "{{company_name}} x partnership".into(),
            body: "Hello {{contact_name}},\n\n{{bm_summary}}\n\n{{sender_signature}}".into(),
            is_default: true,
        })
        .await?;

    let mut draft_ids = Vec::with_capacity(n);
    for i in 0..n {
        let company = Company {
            id: Uuid::new_v4(),
            name: format!("Demo Company {}", i + 1),
            contact_name: Some(format!("Contact {}", i + 1)),
            contact_title: Some("CEO".into()),
            contact_email: Some(format!("contact{}@example.com", i + 1)),
            bm_summary: Some("B2B SaaS".into()),
            news_summary: None,
            send_status: SendStatus::NotSent,
            send_count: 0,
            last_send_date: None,
        };
        store.insert_company(&company).await?;

        let now = Utc::now();
        let draft = Draft {
            id: Uuid::new_v4(),
            company_id: company.id,
            template_id: None,
            subject: format!("Hello {}", company.name),
            body: "Short intro.\nTalk soon.".into(),
            send_order: 1,
            status: DraftStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        store.insert_draft(&draft).await?;
        draft_ids.push(draft.id);
        println!("+ company {} draft {}", company.id, draft.id);
    }

    if !draft_ids.is_empty() {
        let report = engine.enqueue_drafts(&draft_ids).await?;
        print_report(&report);
    }
    Ok(())
}
