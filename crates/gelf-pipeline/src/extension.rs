// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Extension context owning the configured handler chains.
//!
//! The host drives the lifecycle explicitly:
//!
//! ```text
//! GelfExtension::validate ──► configure ──► create_handlers ──► handlers_for(program) ... ──► close
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::config::{EnvOverrides, GelfSettings, HandlerSettings};
use crate::errors::ConfigError;
use crate::handler::{Forwarder, Handler, HandlerChain, MultiLine, Recognizing};
use crate::hostname::get_hostname;
use crate::recognizer::create_recognizer;
use crate::sink::{create_sink, Sink};
use crate::{ENCAB, GELF_PROGRAM};

/// Assembles `MultiLine(Recognizing(Forwarder(sink)))` for one handler.
pub fn chain_for_sink<S>(
    name: &str,
    settings: &HandlerSettings,
    sink: S,
) -> Result<HandlerChain, ConfigError>
where
    S: Sink + 'static,
{
    let recognizer = create_recognizer(&settings.recognizer)?;
    let forwarder = Forwarder::new(name, settings.level, sink);
    let recognizing = Recognizing::new(Arc::clone(&recognizer), forwarder);
    let multiline = MultiLine::new(recognizing, recognizer, settings.multiline_timeout()?)?;
    Ok(Arc::new(multiline))
}

/// Builds the chain for `settings`, delivering to the configured endpoint.
pub fn build_chain(
    name: &str,
    settings: &HandlerSettings,
    hostname: &str,
) -> Result<HandlerChain, ConfigError> {
    let sink = create_sink(settings, hostname)?;
    debug!(
        suppress = true,
        program = GELF_PROGRAM,
        "Creating GELF handler {} for {}",
        name,
        sink.destination()
    );
    chain_for_sink(name, settings, sink)
}

#[derive(Default)]
pub struct GelfExtension {
    enabled: bool,
    settings: GelfSettings,
    hostname: Option<String>,
    chains: BTreeMap<String, HandlerChain>,
}

impl GelfExtension {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `hostname` in the GELF `host` field instead of detecting it.
    #[must_use]
    pub fn with_hostname(hostname: impl Into<String>) -> Self {
        GelfExtension {
            hostname: Some(hostname.into()),
            ..Default::default()
        }
    }

    /// Checks `settings` without keeping them. Recognizer patterns are
    /// compiled so a broken Grok expression fails here.
    pub fn validate(enabled: bool, settings: &GelfSettings) -> Result<(), ConfigError> {
        if !enabled {
            return Ok(());
        }
        settings.validate()?;
        for handler in settings.handlers.values().filter(|h| h.enabled) {
            create_recognizer(&handler.recognizer)?;
        }
        Ok(())
    }

    /// Applies environment overrides and stores the resulting settings.
    pub fn configure(
        &mut self,
        enabled: bool,
        mut settings: GelfSettings,
        env: &HashMap<String, String>,
    ) -> Result<(), ConfigError> {
        let overrides = EnvOverrides::from_env(env)?;
        let enabled = overrides.apply(enabled, &mut settings);
        Self::validate(enabled, &settings)?;

        self.enabled = enabled;
        self.settings = settings;
        Ok(())
    }

    /// True when the extension is enabled and at least one handler is.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.settings.handlers.values().any(|h| h.enabled)
    }

    #[must_use]
    pub fn settings(&self) -> &GelfSettings {
        &self.settings
    }

    /// Builds one chain per enabled handler, replacing previously built ones.
    pub fn create_handlers(&mut self) -> Result<Vec<HandlerChain>, ConfigError> {
        self.close();
        if !self.is_enabled() {
            return Ok(Vec::new());
        }

        let hostname = self.hostname.clone().unwrap_or_else(get_hostname);
        let mut chains = BTreeMap::new();
        for (name, handler) in self.settings.handlers.iter().filter(|(_, h)| h.enabled) {
            chains.insert(name.clone(), build_chain(name, handler, &hostname)?);
        }
        self.chains = chains;
        Ok(self.chains.values().cloned().collect())
    }

    /// Chains that should receive the output of `program`. The host's own
    /// output is delivered through its logging instead.
    #[must_use]
    pub fn handlers_for(&self, program: &str) -> Vec<HandlerChain> {
        if program == ENCAB {
            return Vec::new();
        }
        self.chains.values().cloned().collect()
    }

    #[must_use]
    pub fn handler(&self, name: &str) -> Option<HandlerChain> {
        self.chains.get(name).cloned()
    }

    /// Flushes and closes every chain.
    pub fn close(&mut self) {
        for chain in std::mem::take(&mut self.chains).into_values() {
            chain.close();
        }
    }
}
