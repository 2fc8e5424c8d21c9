// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `mainswatch` command line.
//!
//! Meant to be driven by cron or a systemd timer (`tick`), or to run its own
//! loop (`run`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use mainswatch::schedule::{QueueId, parse_schedule, select_preferred};
use mainswatch::stats::daily_uptime;
use mainswatch::store::SqliteStore;
use mainswatch::{Engine, Error, MonitorConfig};

const DEFAULT_CONFIG_PATH: &str = "mainswatch.json";

#[derive(Parser, Debug)]
#[command(name = "mainswatch", version, about = "Mains power and voltage monitor")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, short, env = "MAINSWATCH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one tick and print its report as JSON.
    Tick,
    /// Tick repeatedly until interrupted.
    Run {
        /// Seconds between ticks.
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
    },
    /// Parse outage announcements (newest first) and print the chosen schedule.
    ParseSchedule {
        /// Queue to extract; defaults to the configured one.
        #[arg(long)]
        queue: Option<QueueId>,
        /// Date to treat as today (YYYY-MM-DD).
        #[arg(long)]
        today: Option<NaiveDate>,
        /// Replace the stored schedule with the result.
        #[arg(long)]
        store: bool,
        /// Announcement files; `-` reads standard input.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Fetch the device local key from the cloud and cache it.
    LocalKey,
    /// Print uptime statistics for one day.
    Stats {
        /// Day to report (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Ask the next tick to poll regardless of the minimum interval.
    Force,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::error!(error = %e, "Cannot serialize output"),
    }
}

fn read_message(path: &Path) -> Result<String, Error> {
    let text = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin())
    } else {
        std::fs::read_to_string(path)
    };
    text.map_err(|e| mainswatch::StorageError::Io(e).into())
}

async fn run(cli: Cli) -> Result<ExitCode, Error> {
    let config = MonitorConfig::load(&cli.config)?;

    match cli.command {
        Command::Tick => {
            let engine = Engine::from_config(&config)?;
            let report = engine.tick().await;
            print_json(&report);
            Ok(if report.ok || report.busy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Run { interval_secs } => {
            let engine = Engine::from_config(&config)?;
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs, mode = %config.mode, "Monitor started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = engine.tick().await;
                        if let Some(error) = &report.error {
                            tracing::warn!(error = %error, online = report.online, "Tick finished with error");
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Interrupted, stopping");
                        return Ok(ExitCode::SUCCESS);
                    }
                }
            }
        }
        Command::ParseSchedule {
            queue,
            today,
            store,
            files,
        } => {
            let Some(queue) = queue.or(config.schedule.queue) else {
                return Err(mainswatch::ConfigError::Missing {
                    mode: "schedule".to_string(),
                    key: "schedule.queue".to_string(),
                }
                .into());
            };
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            let messages = files
                .iter()
                .map(PathBuf::as_path)
                .map(read_message)
                .collect::<Result<Vec<_>, _>>()?;

            let chosen = if store {
                let config = config.with_schedule_queue(queue);
                Engine::from_config(&config)?.update_schedule(&messages, today)?
            } else {
                let candidates = messages
                    .iter()
                    .filter_map(|text| parse_schedule(text, &queue, today).ok());
                select_preferred(candidates, today)
            };

            match chosen {
                Some(schedule) => {
                    print_json(&schedule.to_intervals(today));
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    tracing::warn!(queue = %queue, "No schedule found");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::LocalKey => {
            let Some(cloud) = config.cloud_client()? else {
                return Err(mainswatch::ConfigError::Missing {
                    mode: "cloud".to_string(),
                    key: "cloud.client_id".to_string(),
                }
                .into());
            };
            match cloud.get_local_key(&config.device.device_id).await? {
                Some(key) => {
                    SqliteStore::open(&config.storage.database)?.save_local_key(&key)?;
                    tracing::info!(device_id = %config.device.device_id, "Local key cached");
                    println!("{key}");
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    tracing::warn!(device_id = %config.device.device_id, "Cloud returned no local key");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Stats { date, json } => {
            let store = SqliteStore::open(&config.storage.database)?;
            let now = Local::now();
            let stats = daily_uptime(&store, date.unwrap_or_else(|| now.date_naive()), now)?;
            if json {
                print_json(&stats);
            } else {
                println!("{}", stats.summary());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Force => {
            SqliteStore::open(&config.storage.database)?.request_force_poll()?;
            tracing::info!("Force poll requested");
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "mainswatch failed");
            ExitCode::FAILURE
        }
    }
}
