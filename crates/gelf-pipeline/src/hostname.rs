// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hostname reported in the GELF `host` field.

use std::collections::HashMap;
use std::env;

use tracing::warn;

use crate::GELF_PROGRAM;

const UNKNOWN_HOST: &str = "unknown";

/// Hostname of the current machine, see [`resolve_hostname`].
#[must_use]
pub fn get_hostname() -> String {
    resolve_hostname(&env::vars().collect())
}

/// Resolves the hostname from, in order:
/// 1. `GELF_HOSTNAME`
/// 2. `HOSTNAME`
/// 3. the system hostname
///
/// Empty values are skipped. Falls back to `unknown`.
#[must_use]
pub fn resolve_hostname(env: &HashMap<String, String>) -> String {
    let configured = ["GELF_HOSTNAME", "HOSTNAME"]
        .iter()
        .filter_map(|name| env.get(*name))
        .map(|value| value.trim())
        .find(|value| !value.is_empty());
    if let Some(hostname) = configured {
        return hostname.to_string();
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => match hostname.to_str() {
            Some(hostname) if !hostname.is_empty() => return hostname.to_string(),
            _ => {}
        },
        Err(e) => {
            warn!(
                suppress = true,
                program = GELF_PROGRAM,
                "Failed to get system hostname: {}",
                e
            );
        }
    }

    warn!(
        suppress = true,
        program = GELF_PROGRAM,
        "Could not determine hostname, using '{UNKNOWN_HOST}'"
    );
    UNKNOWN_HOST.to_string()
}
