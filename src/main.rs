use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use clearskies::airports::runways::{InMemoryRunwayCatalog, RunwayCatalog};
use clearskies::airports::{AirportCatalog, InMemoryAirportCatalog};
use clearskies::cache::{CachePolicy, ObservationCache};
use clearskies::clock::{Clock, SystemClock};
use clearskies::conditions::service::ConditionsService;
use clearskies::conditions::{ConditionsEngine, ConditionsResult, CrosswindSide, FlightCategory};
use clearskies::config::AppConfig;
use clearskies::error::ConditionsError;
use clearskies::health::{self, HealthStatus};
use clearskies::weather::aviation_weather::AviationWeatherClient;

#[derive(Parser)]
#[command(name = "clearskies", about = "Current flyable conditions from cached METAR observations")]
struct Cli {
    /// Config file (defaults to ./clearskies.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current conditions for an airport
    Conditions {
        /// ICAO station id, e.g. KSFO
        icao: String,
        /// Runway designator for wind components, e.g. 28L
        #[arg(short, long)]
        runway: Option<String>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// List known runways and headings for an airport
    Runways {
        icao: String,
        #[arg(long)]
        json: bool,
    },
    /// Search airports by ICAO, IATA or name
    Search {
        query: String,
        /// Results per page (1-50)
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: usize,
        #[arg(long)]
        json: bool,
    },
    /// Repeat a conditions request to watch cache behavior
    Watch {
        icao: String,
        #[arg(short, long)]
        runway: Option<String>,
        /// Seconds between requests
        #[arg(short, long, default_value = "60")]
        interval: u64,
        /// Number of requests (0 = until Ctrl-C)
        #[arg(short = 'n', long, default_value = "0")]
        count: u32,
        /// One JSON object per request, then the cache stats
        #[arg(long)]
        json: bool,
    },
    /// Check that the METAR feed answers
    Health {
        /// Station to fetch (defaults to upstream.health_station)
        #[arg(short, long)]
        station: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clearskies=info".into()),
        )
        .init();

    // Load .env if present (override system env vars)
    dotenvy::dotenv_override().ok();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    let airports = Arc::new(InMemoryAirportCatalog::builtin());
    let runways = Arc::new(InMemoryRunwayCatalog::builtin());

    match cli.command {
        Commands::Conditions { icao, runway, json } => {
            let service = build_service(&config, airports, runways)?;
            let cancel = cancel_on_ctrl_c();

            match service.get_conditions(&icao, runway.as_deref(), &cancel).await {
                Ok(result) if json => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                Ok(result) => print_conditions(&result),
                Err(e) => report(e),
            }
        }
        Commands::Runways { icao, json } => {
            let name = airports
                .get(&icao)
                .map(|a| format!("{} ({}, {})", a.name, a.city, a.region))
                .unwrap_or_else(|| icao.to_uppercase());

            match runways.all_runways(&icao) {
                Some(list) if json => {
                    println!("{}", serde_json::to_string_pretty(&list)?);
                }
                Some(list) => {
                    println!("\n🛬 Runways at {}", name);
                    println!("\n{:<8} {:>8}", "Runway", "Heading");
                    println!("{}", "-".repeat(17));
                    for r in &list {
                        println!("{:<8} {:>7}°", r.designator, format!("{:03}", r.magnetic_heading_deg));
                    }
                }
                None => println!("\n⚠️  No runway data for {}", name),
            }
        }
        Commands::Search {
            query,
            limit,
            page,
            json,
        } => {
            let results = match airports.search_page(&query, page, limit) {
                Ok(results) => results,
                Err(e) => {
                    eprintln!("\n⚠️  {}", e);
                    std::process::exit(2);
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.items.is_empty() {
                println!(
                    "\nNo airports on page {} for {:?} ({} matches, {} known)",
                    results.page,
                    query,
                    results.total,
                    airports.len()
                );
            } else {
                println!("\n{:<6} {:<5} {:<42} {:>8}", "ICAO", "IATA", "Name", "Elev ft");
                println!("{}", "-".repeat(64));
                for a in &results.items {
                    println!(
                        "{:<6} {:<5} {:<42} {:>8}",
                        a.icao,
                        a.iata.as_deref().unwrap_or("-"),
                        truncate(&format!("{}, {}", a.name, a.city), 42),
                        a.elevation_ft
                    );
                }
                let pages = results.total.div_ceil(results.page_size);
                println!("\nPage {} of {} ({} matches)", results.page, pages, results.total);
            }
        }
        Commands::Watch {
            icao,
            runway,
            interval,
            count,
            json,
        } => {
            let service = build_service(&config, airports, runways)?;
            let cancel = cancel_on_ctrl_c();
            let interval = Duration::from_secs(interval.max(1));

            info!("Watching {} every {}s (Ctrl-C to stop)", icao.to_uppercase(), interval.as_secs());
            let mut n = 0u32;
            loop {
                n += 1;
                match service.get_conditions(&icao, runway.as_deref(), &cancel).await {
                    Ok(result) if json => println!("{}", serde_json::to_string(&result)?),
                    Ok(result) => print_conditions(&result),
                    Err(ConditionsError::Cancelled(_)) => break,
                    Err(e) if e.is_client_error() => report(e),
                    Err(e) => println!("\n❌ {}", e),
                }

                if count > 0 && n >= count {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }

            let stats = service.cache().stats();
            if json {
                println!("{}", serde_json::to_string(&stats)?);
            } else {
                println!("\n📊 Cache: {} hits, {} misses, {} fallbacks, {} evicted, {} coalesced, {} upstream failures",
                    stats.hits, stats.misses, stats.fallbacks, stats.evictions, stats.coalesced, stats.upstream_failures);
                println!("   Upstream: {} calls, avg {}ms, last {}ms",
                    stats.upstream_calls, stats.avg_upstream_ms(), stats.upstream_last_ms);
                let cache_health = health::check_cache(service.cache());
                println!("   Hit ratio: {:.0}% | {} {}", stats.hit_ratio() * 100.0, cache_health.status, cache_health.detail);
            }
        }
        Commands::Health { station, json } => {
            let source = AviationWeatherClient::new(&config.upstream.base_url, &config.upstream.user_agent)
                .context("Failed to build METAR client")?;
            let station = station.unwrap_or_else(|| config.upstream.health_station.clone());
            let cancel = cancel_on_ctrl_c();

            let checked = health::check_source(
                &source,
                &station,
                Duration::from_secs(config.weather.fetch_timeout_secs),
                &cancel,
            )
            .await;

            if json {
                println!("{}", serde_json::to_string_pretty(&checked)?);
            } else {
                let icon = match checked.status {
                    HealthStatus::Healthy => "✅",
                    HealthStatus::Degraded => "⚠️ ",
                    HealthStatus::Unhealthy => "❌",
                };
                let took = checked.duration_ms.map(|ms| format!(" ({}ms)", ms)).unwrap_or_default();
                println!("\n{} Upstream {}{}: {}", icon, checked.status, took, checked.detail);
            }
            if checked.status == HealthStatus::Unhealthy {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn build_service(
    config: &AppConfig,
    airports: Arc<InMemoryAirportCatalog>,
    runways: Arc<InMemoryRunwayCatalog>,
) -> Result<ConditionsService> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = AviationWeatherClient::new(&config.upstream.base_url, &config.upstream.user_agent)
        .context("Failed to build METAR client")?;
    let cache = Arc::new(ObservationCache::new(
        CachePolicy::from_config(&config.weather),
        clock.clone(),
    ));

    Ok(ConditionsService::new(
        Arc::new(source),
        cache,
        airports,
        runways,
        clock,
        ConditionsEngine::from_config(&config.weather),
        Duration::from_secs(config.weather.fetch_timeout_secs),
    ))
}

/// Token cancelled on the first Ctrl-C so an in-flight fetch stops cleanly.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling");
            token.cancel();
        }
    });
    cancel
}

/// Print a request failure once and exit: 2 for a bad request, 1 otherwise.
fn report(err: ConditionsError) -> ! {
    if err.is_client_error() {
        eprintln!("\n⚠️  {}", err);
        std::process::exit(2);
    }
    eprintln!("\n❌ {}", err);
    std::process::exit(1);
}

fn print_conditions(r: &ConditionsResult) {
    let icon = match r.flight_category {
        FlightCategory::Vfr => "🟢",
        FlightCategory::Mvfr => "🔵",
        FlightCategory::Ifr => "🔴",
        FlightCategory::Lifr => "🟣",
        FlightCategory::Unknown => "⚪",
    };

    println!("\n{} {} {}  ({})", icon, r.station_id, r.flight_category, r.cache_result);
    println!("   {}", r.raw_text);
    println!(
        "   Observed: {}  ({} min ago){}",
        r.observed_at.format("%Y-%m-%d %H:%MZ"),
        r.age_minutes,
        if r.is_critically_stale {
            "  ⛔ CRITICALLY STALE"
        } else if r.is_stale {
            "  ⚠️  STALE"
        } else {
            ""
        }
    );

    let gust = r.gust_kt.map(|g| format!("G{:.0}", g)).unwrap_or_default();
    if r.wind_variable {
        println!("   Wind: VRB @ {:.0}{} kt", r.wind_speed_kt, gust);
    } else {
        println!("   Wind: {:03.0}° @ {:.0}{} kt", r.wind_direction_deg, r.wind_speed_kt, gust);
    }
    if r.runway_heading_deg != 0 {
        let side = match r.crosswind_side {
            CrosswindSide::None => String::new(),
            side => format!(" from {}", side),
        };
        let head = if r.headwind_kt < 0.0 {
            format!("tailwind {:.1} kt", -r.headwind_kt)
        } else {
            format!("headwind {:.1} kt", r.headwind_kt)
        };
        println!(
            "   Runway {:03}°: {} | crosswind {:.1} kt{}",
            r.runway_heading_deg, head, r.crosswind_kt, side
        );
    }

    let ceiling = r
        .ceiling_ft_agl
        .map(|c| format!("{} ft", c))
        .unwrap_or_else(|| "none".to_string());
    println!("   Visibility: {} sm | Ceiling: {}", r.visibility_statute_miles, ceiling);
    println!(
        "   Temp/Dew: {:.0}°C / {:.0}°C (spread {:.0}) | Altimeter: {:.2} inHg",
        r.temperature_c,
        r.dewpoint_c,
        r.temperature_c - r.dewpoint_c,
        r.altimeter_in_hg
    );
    println!("   Density altitude: {} ft", r.density_altitude_ft);
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
