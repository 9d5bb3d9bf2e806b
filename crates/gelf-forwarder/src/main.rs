// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use std::collections::HashMap;
use std::io::{self, BufRead};
use std::{env, fs, process};

use tracing::{debug, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

use gelf_pipeline::config::GelfSettings;
use gelf_pipeline::layer::{HandlerRegistry, RecordLayer};
use gelf_pipeline::{ConfigError, GelfExtension, Handler, LogRecord, Severity, ENCAB};

const DEFAULT_CONFIG_PATH: &str = "gelf.yml";
const DEFAULT_PROGRAM: &str = "stdin";

pub fn main() {
    let log_level = env::var("GELF_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,hyper_util=off,rustls=off,reqwest=off,{log_level}");

    let registry = HandlerRegistry::default();

    #[allow(clippy::expect_used)]
    let filter = || {
        EnvFilter::try_new(&env_filter).expect("could not parse log level in configuration")
    };
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(logger::Formatter)
                .with_writer(io::stderr)
                .with_filter(filter()),
        )
        .with(RecordLayer::new(ENCAB, registry.clone()).with_filter(filter()));

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let program = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_PROGRAM.to_string());
    let config_path = env::var("GELF_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let settings = match load_settings(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Error loading GELF settings from {config_path}: {e}");
            process::exit(1);
        }
    };

    let env_vars: HashMap<String, String> = env::vars().collect();
    let mut extension = GelfExtension::new();
    if let Err(e) = extension.configure(true, settings, &env_vars) {
        error!("Invalid GELF configuration: {e}");
        process::exit(1);
    }

    let chains = match extension.create_handlers() {
        Ok(chains) => chains,
        Err(e) => {
            error!("Error creating GELF handlers: {e}");
            process::exit(1);
        }
    };
    for chain in &chains {
        registry.register(chain.clone());
    }

    let handlers = extension.handlers_for(&program);
    info!(
        "Forwarding output of {program} to {} GELF handler(s)",
        handlers.len()
    );

    for line in io::stdin().lock().lines() {
        match line {
            Ok(line) => {
                for handler in &handlers {
                    handler.emit(
                        LogRecord::new(program.as_str(), Severity::Info, line.as_str())
                            .with_program(program.as_str()),
                    );
                }
            }
            Err(e) => {
                error!("Error reading input: {e}");
                break;
            }
        }
    }

    debug!("Input closed, flushing GELF handlers");
    registry.take();
    extension.close();
}

/// Reads settings from `path`. A missing file yields empty settings so the
/// environment alone can configure the forwarder.
fn load_settings(path: &str) -> Result<GelfSettings, ConfigError> {
    match fs::read_to_string(path) {
        Ok(source) => GelfSettings::from_yaml(&source),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No settings file at {path}, relying on the environment");
            Ok(GelfSettings::default())
        }
        Err(e) => Err(ConfigError::Parse(e.to_string())),
    }
}
