// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The load orchestrator installed in place of a system's load entry.
//!
//! Per request: validate, `beforeLoad`, access check, override dispatch,
//! resolution, reload eviction, produce the result, `onLoad`, copy handling,
//! `afterLoad`.

use crate::error::{ModgateError, Result};
use crate::intercept::access;
use crate::intercept::events::{emit_after_load, emit_before_load, emit_on_load, EventKind};
use crate::intercept::overrides::{self, OriginalLoader, OverrideOutcome, OverrideRequest};
use crate::module_system::{verify_identifier, LoadEntry, ModuleSystem, ResolveResult};
use crate::policy::Policy;
use crate::value::Value;
use std::path::Path;
use tracing::debug;

/// Load `identifier` for the module at `parent` under `policy`.
///
/// `original` is the load entry that was in place before interception; it is
/// handed to override handlers so they can delegate to normal loading.
pub fn load(
    system: &ModuleSystem,
    identifier: &str,
    parent: &Path,
    policy: &Policy,
    original: &LoadEntry,
) -> Result<Value> {
    verify_identifier(identifier)?;
    emit_before_load(policy.listeners(EventKind::BeforeLoad), identifier)?;
    access::enforce(identifier, policy)?;

    let resolution = system.resolve(identifier, parent);
    let location = match &resolution {
        Ok(resolved) => resolved.location().display().to_string(),
        Err(_) => String::new(),
    };

    let outcome = overrides::dispatch(
        &OverrideRequest {
            identifier,
            location: &location,
            original: OriginalLoader::new(system.clone(), original.clone(), parent),
        },
        policy,
    )?;

    let resolved = match resolution {
        Ok(resolved) => Some(resolved),
        Err(err) if matches!(outcome, OverrideOutcome::FinishedResult(_)) => {
            debug!("Resolution of {} failed behind an override: {}", identifier, err);
            None
        }
        Err(err) => return Err(err),
    };
    let file = match &resolved {
        Some(ResolveResult::File(path)) => Some(path.as_path()),
        _ => None,
    };

    // in-progress entries stay so circular requires see the partial exports
    if policy.reload() {
        if let Some(path) = file {
            if system.cache().get(path).is_some_and(|cached| cached.loaded) {
                system.cache().delete(path);
                debug!("Evicted {} for reload", path.display());
            }
        }
    }

    let wants_source = !policy.listeners(EventKind::OnLoad).is_empty();
    let (result, source) = match outcome {
        OverrideOutcome::FinishedResult(value) => (value, String::new()),
        OverrideOutcome::ReplacementSource(text) => {
            let Some(resolved) = &resolved else {
                return Err(ModgateError::module_not_found(identifier));
            };
            let result = system.compile(&text, &resolved.location())?;
            (result, text)
        }
        OverrideOutcome::NoOverride => {
            let Some(resolved) = &resolved else {
                return Err(ModgateError::module_not_found(identifier));
            };
            let result = system.load_resolved(resolved, parent)?;
            let source = match file {
                Some(path) if wants_source => system.read_source(path)?,
                _ => String::new(),
            };
            (result, source)
        }
    };

    let result = emit_on_load(policy.listeners(EventKind::OnLoad), identifier, &source, result)?;

    let result = if policy.use_copy() {
        let copy = result.deep_copy();
        if let Some(path) = file {
            if system.cache().get(path).is_some_and(|cached| cached.loaded) {
                system.cache().delete(path);
                debug!("Dropped cached instance of {} after copy", path.display());
            }
        }
        copy
    } else {
        result
    };

    emit_after_load(policy.listeners(EventKind::AfterLoad), &result, identifier)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::events::Listener;
    use crate::intercept::overrides::OverrideHandler;
    use crate::module_system::{default_entry, CompileUnit};
    use parking_lot::Mutex;
    use std::fs;
    use std::sync::Arc;

    fn system_in(dir: &Path) -> ModuleSystem {
        ModuleSystem::builder()
            .cwd(dir)
            .compiler_fn(|unit: &CompileUnit<'_>| {
                Ok(Value::object([("text", Value::from(unit.source))]))
            })
            .build()
    }

    fn run(system: &ModuleSystem, id: &str, policy: &Policy) -> Result<Value> {
        load(system, id, &system.root_parent(), policy, &default_entry())
    }

    #[test]
    fn test_plain_load_matches_default_loader() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "alpha").unwrap();
        let system = system_in(dir.path());

        let result = run(&system, "./a", &Policy::new()).unwrap();
        assert_eq!(result.get("text"), Some(Value::from("alpha")));
        assert_eq!(system.cache().len(), 1);
    }

    #[test]
    fn test_events_fire_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "alpha").unwrap();
        let system = system_in(dir.path());
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut policy = Policy::new();
        let before = Arc::clone(&log);
        policy.add_listener(
            EventKind::BeforeLoad,
            Listener::before_load(move |id| {
                before.lock().push(format!("before {}", id));
                Ok(())
            }),
        );
        let during = Arc::clone(&log);
        policy.add_listener(
            EventKind::OnLoad,
            Listener::on_load(move |id, source, _| {
                during.lock().push(format!("load {} {}", id, source));
                Ok(Some(Value::from("replaced")))
            }),
        );
        let after = Arc::clone(&log);
        policy.add_listener(
            EventKind::AfterLoad,
            Listener::after_load(move |result, id| {
                after.lock().push(format!("after {} {}", id, result));
                Ok(())
            }),
        );

        let result = run(&system, "./a", &policy).unwrap();
        assert_eq!(result, Value::from("replaced"));
        assert_eq!(
            *log.lock(),
            vec!["before ./a", "load ./a alpha", "after ./a replaced"]
        );
    }

    #[test]
    fn test_before_load_runs_even_when_denied() {
        let system = ModuleSystem::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);
        let mut policy = Policy::new();
        policy.add_blacklist("secretlib").unwrap();
        policy.add_listener(
            EventKind::BeforeLoad,
            Listener::before_load(move |_| {
                *counter.lock() += 1;
                Ok(())
            }),
        );

        let err = run(&system, "secretlib", &policy).unwrap_err();
        assert!(matches!(err, ModgateError::AccessDenied { .. }));
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_finished_result_tolerates_missing_module() {
        let system = ModuleSystem::new();
        let mut policy = Policy::new();
        policy
            .add_override("virtual", OverrideHandler::result(Value::from(42.0)))
            .unwrap();

        assert_eq!(run(&system, "virtual", &policy).unwrap(), Value::Number(42.0));
        assert!(matches!(
            run(&system, "missing", &policy),
            Err(ModgateError::ModuleNotFound(_))
        ));
    }

    #[test]
    fn test_override_sees_resolved_location() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "alpha").unwrap();
        let system = system_in(dir.path());
        let seen = Arc::new(Mutex::new(String::new()));
        let record = Arc::clone(&seen);
        let mut policy = Policy::new();
        policy
            .add_override(
                "./a",
                OverrideHandler::new(move |req| {
                    *record.lock() = req.location.to_string();
                    Ok(OverrideOutcome::NoOverride)
                }),
            )
            .unwrap();

        run(&system, "./a", &policy).unwrap();
        assert_eq!(*seen.lock(), dir.path().join("a.js").display().to_string());
    }

    #[test]
    fn test_replacement_source_is_compiled_at_location() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "alpha").unwrap();
        let system = system_in(dir.path());
        let mut policy = Policy::new();
        policy.add_override("./a", OverrideHandler::source("beta")).unwrap();

        let result = run(&system, "./a", &policy).unwrap();
        assert_eq!(result.get("text"), Some(Value::from("beta")));
        assert!(system.cache().is_empty());
    }

    #[test]
    fn test_use_copy_evicts_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "alpha").unwrap();
        let system = system_in(dir.path());
        let mut policy = Policy::new();
        policy.set_use_copy(true);

        let result = run(&system, "./a", &policy).unwrap();
        assert_eq!(result.get("text"), Some(Value::from("alpha")));
        assert!(system.cache().is_empty());
    }
}
