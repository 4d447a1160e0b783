// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! End-to-end behaviour of installed load interception

use modgate_core::{
    install, restore, CompileUnit, DenyRule, EventKind, Listener, ModgateError, ModuleSystem,
    OverrideHandler, OverrideOutcome, Policy, SharedPolicy, Transform, TransformOutput, Value,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// A module tree on disk plus a system whose compiler counts its calls and
/// exports `{ source: <text> }`.
struct Fixture {
    dir: TempDir,
    system: ModuleSystem,
    compiles: Arc<AtomicUsize>,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }

        let compiles = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&compiles);
        let system = ModuleSystem::builder()
            .cwd(dir.path())
            .compiler_fn(move |unit: &CompileUnit<'_>| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::object([("source", Value::from(unit.source))]))
            })
            .build();

        Self {
            dir,
            system,
            compiles,
        }
    }

    fn install(&self, policy: Policy) -> SharedPolicy {
        let shared = SharedPolicy::new(policy);
        assert!(install(&self.system, &shared).unwrap());
        shared
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

fn denial(result: modgate_core::Result<Value>) -> DenyRule {
    match result {
        Err(ModgateError::AccessDenied { rule, .. }) => rule,
        other => panic!("expected access denial, got {:?}", other),
    }
}

#[test]
fn test_blacklist_wins_over_whitelist_and_override() {
    let fx = Fixture::new(&[]);
    let mut policy = Policy::new();
    policy.add_blacklist("secretlib").unwrap();
    policy.add_whitelist("secretlib").unwrap();
    policy
        .add_override("secretlib", OverrideHandler::result(Value::from(1.0)))
        .unwrap();
    fx.install(policy);

    assert_eq!(denial(fx.system.require("secretlib")), DenyRule::Blacklisted);
}

#[test]
fn test_whitelist_denies_natives_outside_it() {
    let fx = Fixture::new(&[]);
    let mut policy = Policy::new();
    policy.add_whitelist("fs").unwrap();
    policy.set_allow_external_modules(true);
    fx.install(policy);

    assert!(fx.system.require("fs").is_ok());
    assert_eq!(denial(fx.system.require("path")), DenyRule::NotWhitelisted);
}

#[test]
fn test_external_modules_disallowed() {
    let fx = Fixture::new(&[("local.js", "x")]);
    let mut policy = Policy::new();
    policy.set_allow_external_modules(false);
    fx.install(policy);

    assert!(fx.system.require("os").is_ok());
    assert_eq!(
        denial(fx.system.require("./local")),
        DenyRule::ExternalDisallowed
    );
    assert_eq!(fx.compiles(), 0);
}

#[test]
fn test_txt_transform_uppercases_before_compile() {
    let fx = Fixture::new(&[("greeting.txt", "hi")]);
    let mut policy = Policy::new();
    policy
        .add_extension(".txt", Transform::text(|src, _| Ok(src.to_uppercase())))
        .unwrap();
    fx.install(policy);

    let exports = fx.system.require("./greeting.txt").unwrap();
    assert_eq!(exports.get("source"), Some(Value::from("HI")));
    // registered suffixes are probed like the stock ones
    let again = fx.system.require("./greeting").unwrap();
    assert!(again.same(&exports));
}

#[test]
fn test_transform_chain_sees_text_without_bom() {
    let fx = Fixture::new(&[("greeting.txt", "\u{feff}hi")]);
    let mut policy = Policy::new();
    policy
        .add_extension(
            ".txt",
            Transform::text(|src, _| {
                assert!(!src.starts_with('\u{feff}'));
                Ok(src.to_uppercase())
            }),
        )
        .unwrap();
    fx.install(policy);

    let exports = fx.system.require("./greeting.txt").unwrap();
    assert_eq!(exports.get("source"), Some(Value::from("HI")));
}

#[test]
fn test_chain_halts_on_finished_exports() {
    let fx = Fixture::new(&[("data.ext", "a,b")]);
    let later = Arc::new(AtomicUsize::new(0));

    let a = {
        let later = Arc::clone(&later);
        Transform::text(move |src, _| {
            later.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{},c", src))
        })
    };
    let b = Transform::new(|src, _| {
        let items = src.split(',').map(Value::from).collect();
        Ok(TransformOutput::Exports(Value::array(items)))
    });

    let mut policy = Policy::new();
    policy.add_extension(".ext", a.clone()).unwrap();
    policy.add_extension(".ext", b).unwrap();
    let shared = fx.install(policy);

    let exports = fx.system.require("./data.ext").unwrap();
    assert_eq!(
        exports,
        Value::array(vec![Value::from("a"), Value::from("b"), Value::from("c")])
    );
    assert_eq!(later.load(Ordering::SeqCst), 1);
    assert_eq!(fx.compiles(), 0);

    // [B, A]: A never runs
    {
        let mut policy = shared.write();
        policy.remove_extension(".ext", Some(&a));
        policy.add_extension(".ext", a).unwrap();
        policy.set_reload(true);
    }
    let exports = fx.system.require("./data.ext").unwrap();
    assert_eq!(exports, Value::array(vec![Value::from("a"), Value::from("b")]));
    assert_eq!(later.load(Ordering::SeqCst), 1);
    assert_eq!(fx.compiles(), 0);
}

#[test]
fn test_override_result_skips_filesystem() {
    let fx = Fixture::new(&[]);
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reads);

    let mut policy = Policy::new();
    policy
        .add_extension(
            ".js",
            Transform::text(move |src, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(src.to_string())
            }),
        )
        .unwrap();
    policy
        .add_override(
            "m",
            OverrideHandler::result(Value::object([("mocked", Value::from(true))])),
        )
        .unwrap();
    fx.install(policy);

    let exports = fx.system.require("m").unwrap();
    assert_eq!(exports.get("mocked"), Some(Value::from(true)));
    assert_eq!(reads.load(Ordering::SeqCst), 0);
    assert_eq!(fx.compiles(), 0);
    assert!(fx.system.cache().is_empty());
}

#[test]
fn test_override_replacement_source() {
    let fx = Fixture::new(&[("config.js", "original")]);
    let mut policy = Policy::new();
    policy
        .add_override(
            "./config",
            OverrideHandler::new(|req| {
                let original = req.original.load("./config")?;
                let text = original.get("source").unwrap_or_default();
                Ok(OverrideOutcome::ReplacementSource(format!("patched {}", text)))
            }),
        )
        .unwrap();
    fx.install(policy);

    let exports = fx.system.require("./config").unwrap();
    assert_eq!(exports.get("source"), Some(Value::from("patched original")));
}

#[test]
fn test_declined_override_falls_through() {
    let fx = Fixture::new(&[("a.js", "alpha")]);
    let mut policy = Policy::new();
    policy
        .add_override("./a", OverrideHandler::new(|_| Ok(OverrideOutcome::NoOverride)))
        .unwrap();
    fx.install(policy);

    let exports = fx.system.require("./a").unwrap();
    assert_eq!(exports.get("source"), Some(Value::from("alpha")));
}

#[test]
fn test_use_copy_returns_independent_values() {
    let fx = Fixture::new(&[("state.json", "{\"count\": 1, \"nested\": {\"on\": true}}")]);
    let mut policy = Policy::new();
    policy.set_use_copy(true);
    fx.install(policy);

    let first = fx.system.require("./state.json").unwrap();
    first.as_object().unwrap().set("count", Value::from(99.0));
    first
        .get("nested")
        .unwrap()
        .as_object()
        .unwrap()
        .set("on", Value::from(false));

    let second = fx.system.require("./state.json").unwrap();
    assert_eq!(second.get("count"), Some(Value::Number(1.0)));
    assert_eq!(
        second.get("nested").unwrap().get("on"),
        Some(Value::from(true))
    );
    assert!(fx.system.cache().is_empty());
}

#[test]
fn test_reload_runs_full_path_each_time() {
    let fx = Fixture::new(&[("counter.txt", "tick")]);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);

    let mut policy = Policy::new();
    policy
        .add_extension(
            ".txt",
            Transform::text(move |src, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(src.to_string())
            }),
        )
        .unwrap();
    policy.set_reload(true);
    fx.install(policy);

    fx.system.require("./counter.txt").unwrap();
    fx.system.require("./counter.txt").unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(fx.compiles(), 2);
}

#[test]
fn test_cache_is_used_without_reload() {
    let fx = Fixture::new(&[("once.js", "x")]);
    fx.install(Policy::new());

    let a = fx.system.require("./once").unwrap();
    let b = fx.system.require("./once.js").unwrap();
    assert!(a.same(&b));
    assert_eq!(fx.compiles(), 1);
}

#[test]
fn test_reload_does_not_touch_natives() {
    let fx = Fixture::new(&[]);
    let mut policy = Policy::new();
    policy.set_reload(true);
    fx.install(policy);

    let a = fx.system.require("fs").unwrap();
    let b = fx.system.require("fs").unwrap();
    assert!(a.same(&b));
}

#[test]
fn test_circular_requires_under_reload() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.js"), "./b").unwrap();
    fs::write(dir.path().join("b.js"), "./a").unwrap();
    let compiles = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&compiles);
    let system = ModuleSystem::builder()
        .cwd(dir.path())
        .compiler_fn(move |unit: &CompileUnit<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::object([("dep", unit.require.call(unit.source.trim())?)]))
        })
        .build();

    let mut policy = Policy::new();
    policy.set_reload(true);
    install(&system, &SharedPolicy::new(policy)).unwrap();

    let a = system.require("./a").unwrap();
    assert_eq!(compiles.load(Ordering::SeqCst), 2);
    // b got the partial exports of a, still empty while a was compiling
    let partial = a.get("dep").and_then(|b| b.get("dep")).unwrap();
    assert!(partial.as_object().unwrap().is_empty());

    system.require("./a").unwrap();
    assert_eq!(compiles.load(Ordering::SeqCst), 4);
}

#[test]
fn test_on_load_listener_replaces_result() {
    let fx = Fixture::new(&[("a.js", "alpha")]);
    let mut policy = Policy::new();
    policy
        .on(
            "onRequire",
            Listener::on_load(|id, source, result| {
                assert_eq!(id, "./a");
                assert_eq!(source, "alpha");
                assert!(result.get("source").is_some());
                Ok(Some(Value::from("wrapped")))
            }),
        )
        .unwrap();
    fx.install(policy);

    assert_eq!(fx.system.require("./a").unwrap(), Value::from("wrapped"));
}

#[test]
fn test_on_load_nullish_return_keeps_result() {
    let fx = Fixture::new(&[("a.js", "alpha")]);
    let mut policy = Policy::new();
    policy.add_listener(
        EventKind::OnLoad,
        Listener::on_load(|_, _, _| Ok(Some(Value::Undefined))),
    );
    fx.install(policy);

    let exports = fx.system.require("./a").unwrap();
    assert_eq!(exports.get("source"), Some(Value::from("alpha")));
}

#[test]
fn test_on_load_source_read_failure_is_reported() {
    let fx = Fixture::new(&[("a.js", "alpha")]);
    let shared = fx.install(Policy::new());
    fx.system.require("./a").unwrap();

    // the cached module is served, but its file is gone by the time onLoad reads it
    let file = fx.path("a.js");
    {
        let mut policy = shared.write();
        policy
            .add_override(
                "./a",
                OverrideHandler::new(move |_| {
                    fs::remove_file(&file)?;
                    Ok(OverrideOutcome::NoOverride)
                }),
            )
            .unwrap();
        policy.add_listener(EventKind::OnLoad, Listener::on_load(|_, _, _| Ok(None)));
    }

    let err = fx.system.require("./a").unwrap_err();
    assert!(matches!(err, ModgateError::Fs(_)));
}

#[test]
fn test_listener_error_aborts_load() {
    let fx = Fixture::new(&[("a.js", "alpha")]);
    let mut policy = Policy::new();
    policy.add_listener(
        EventKind::AfterLoad,
        Listener::after_load(|_, id| Err(ModgateError::Generic(format!("rejected {}", id)))),
    );
    fx.install(policy);

    let err = fx.system.require("./a").unwrap_err();
    assert_eq!(err.to_string(), "rejected ./a");
    // the default loader already cached the module before afterLoad ran
    assert_eq!(fx.system.cache().len(), 1);
}

#[test]
fn test_policy_edits_apply_to_next_load() {
    let fx = Fixture::new(&[("a.js", "alpha")]);
    let shared = fx.install(Policy::new());

    assert!(fx.system.require("./a").is_ok());
    shared.write().add_blacklist("./a").unwrap();
    assert_eq!(denial(fx.system.require("./a")), DenyRule::Blacklisted);
}

#[test]
fn test_nested_requires_go_through_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("main.js"), "./dep").unwrap();
    fs::write(dir.path().join("dep.js"), "").unwrap();
    let system = ModuleSystem::builder()
        .cwd(dir.path())
        .compiler_fn(|unit: &CompileUnit<'_>| {
            let target = unit.source.trim();
            if target.is_empty() {
                return Ok(Value::from("leaf"));
            }
            Ok(Value::object([("dep", unit.require.call(target)?)]))
        })
        .build();

    let mut policy = Policy::new();
    policy.add_blacklist("./dep").unwrap();
    install(&system, &SharedPolicy::new(policy)).unwrap();

    let err = system.require("./main").unwrap_err();
    assert!(matches!(err, ModgateError::AccessDenied { .. }));
    assert!(system.cache().is_empty());
}

#[test]
fn test_search_paths_apply_at_install() {
    let fx = Fixture::new(&[("vendor/shared/index.js", "shared")]);
    let mut policy = Policy::new();
    policy.add_path(fx.path("vendor")).unwrap();

    assert!(fx.system.require("shared").is_err());
    fx.install(policy);
    let exports = fx.system.require("shared").unwrap();
    assert_eq!(exports.get("source"), Some(Value::from("shared")));

    restore(&fx.system);
    fx.system.cache().clear();
    assert!(matches!(
        fx.system.require("shared"),
        Err(ModgateError::ModuleNotFound(_))
    ));
}

#[test]
fn test_install_restore_round_trip() {
    let fx = Fixture::new(&[("notes.txt", "hi")]);
    let entry = fx.system.entry();
    let table = fx.system.extension_table();
    let search_path = fx.system.search_path();

    let mut policy = Policy::new();
    policy.add_blacklist("os").unwrap();
    policy
        .add_extension(".txt", Transform::text(|src, _| Ok(src.to_uppercase())))
        .unwrap();
    policy.add_path(fx.path("lib")).unwrap();
    let shared = fx.install(policy);
    assert!(!install(&fx.system, &shared).unwrap());

    assert!(restore(&fx.system));
    assert!(!restore(&fx.system));
    assert!(fx.system.entry().ptr_eq(&entry));
    assert!(fx.system.extension_table().same_as(&table));
    assert_eq!(fx.system.search_path(), search_path);

    assert!(fx.system.require("os").is_ok());
    let exports = fx.system.require("./notes.txt").unwrap();
    assert_eq!(exports.get("source"), Some(Value::from("hi")));
}

#[test]
fn test_copies_do_not_disturb_original() {
    let fx = Fixture::new(&[("a.js", "alpha")]);
    let mut policy = Policy::new();
    policy.add_blacklist("./a").unwrap();

    let copy = fx.system.detached_copy();
    install(&copy, &SharedPolicy::new(policy)).unwrap();

    assert!(copy.is_installed());
    assert!(!fx.system.is_installed());
    assert!(copy.require("./a").is_err());
    assert!(fx.system.require("./a").is_ok());

    let fresh = copy.detached_copy();
    assert!(!fresh.is_installed());
    assert!(fresh.require("./a").is_ok());
}

#[test]
fn test_invalid_requests() {
    let fx = Fixture::new(&[]);
    fx.install(Policy::new());

    assert!(matches!(
        fx.system.require(""),
        Err(ModgateError::InvalidIdentifier(_))
    ));
    let require = fx.system.require_handle(fx.path("main.js"));
    assert!(matches!(
        require.call_value(&Value::Null),
        Err(ModgateError::InvalidIdentifier(_))
    ));
    assert!(matches!(
        fx.system.require("./missing"),
        Err(ModgateError::ModuleNotFound(_))
    ));
    assert!(Path::new(require.parent()).ends_with("main.js"));
}
