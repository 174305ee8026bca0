/// Harness generation: wraps the submitted script so the entry point is
/// invoked and its JSON-serialized return value lands in a dedicated result
/// file, never on stdout. Arbitrary `print` calls therefore cannot corrupt
/// the structured result.
use crate::sandbox::SandboxConfig;
use std::collections::BTreeSet;
use std::path::Path;

/// File name of the result channel inside the scratch directory.
pub const RESULT_FILE: &str = "__scriptbox_result.json";

/// Exit code reserved by the runtime interception layer for denied
/// operations. Distinguishes a policy violation from an ordinary crash.
pub const DENIED_EXIT_CODE: i32 = 77;

/// Stderr marker written alongside the reserved exit code. Classification
/// requires both, so a script that merely exits with the bare code is an
/// ordinary crash, not a policy violation.
pub const DENIED_MARKER: &str = "sandbox denied:";

/// Harness for the primary strategy: entry-point invocation and result
/// serialization only; isolation is enforced by the OS layer.
pub fn isolated_harness(script: &str, config: &SandboxConfig, result_path: &Path) -> String {
    runner(script, config, result_path)
}

/// Harness for the fallback strategy: prepends a runtime interception
/// prelude that re-applies the denylist at call granularity, then the same
/// runner as the primary path. Policy ceilings are identical on both paths;
/// only the isolation mechanism differs.
pub fn restricted_harness(script: &str, config: &SandboxConfig, result_path: &Path) -> String {
    format!(
        "{}{}",
        interception_prelude(config),
        runner(script, config, result_path)
    )
}

fn runner(script: &str, config: &SandboxConfig, result_path: &Path) -> String {
    format!(
        "import json as __scriptbox_json\n\
         import sys as __scriptbox_sys\n\
         \n\
         {script}\n\
         \n\
         def __scriptbox_run():\n\
         \x20   try:\n\
         \x20       value = {entry}()\n\
         \x20   except BaseException as exc:\n\
         \x20       __scriptbox_sys.stdout.flush()\n\
         \x20       __scriptbox_sys.stderr.write(\"unhandled exception: %r\\n\" % (exc,))\n\
         \x20       raise SystemExit(1)\n\
         \x20   try:\n\
         \x20       payload = __scriptbox_json.dumps(value)\n\
         \x20   except (TypeError, ValueError) as exc:\n\
         \x20       __scriptbox_sys.stdout.flush()\n\
         \x20       __scriptbox_sys.stderr.write(\"return value is not JSON-serializable: %r\\n\" % (exc,))\n\
         \x20       raise SystemExit(1)\n\
         \x20   with open({result_path}, \"w\") as handle:\n\
         \x20       handle.write(payload)\n\
         \x20   __scriptbox_sys.stdout.flush()\n\
         \n\
         __scriptbox_run()\n",
        script = script,
        entry = config.entry_point,
        result_path = py_str(&result_path.display().to_string()),
    )
}

/// Runtime denylist enforcement via the interpreter's audit-hook mechanism.
/// Backstop for indirection that static validation cannot resolve: even a
/// script that slipped past the validator cannot invoke a denied operation
/// at runtime.
///
/// Hook state is captured in default arguments, evaluated once at definition
/// time, so a script rebinding module-level names cannot reach it. The
/// interpreter raises the `exec` event for every module code object it
/// imports; only code compiled from an in-memory string counts as dynamic
/// execution, and the runner's own imports are cached here before the hook
/// is installed. Module loads are confined to the interpreter's own prefixes
/// plus the scratch directory, so writable scratch space cannot be used to
/// smuggle importable code.
fn interception_prelude(config: &SandboxConfig) -> String {
    let denied_modules = py_string_list(config.denied_modules.iter().map(String::as_str));
    let denied_events = py_string_list(audit_events(&config.denied_calls).iter().map(String::as_str));
    let scratch = py_str(&config.scratch_dir.display().to_string());

    format!(
        "import json as __scriptbox_json\n\
         import os as __scriptbox_os\n\
         import sys as __scriptbox_sys\n\
         \n\
         def __scriptbox_deny(reason, __stderr=__scriptbox_sys.stderr, __exit=__scriptbox_os._exit):\n\
         \x20   __stderr.write(\"{marker} %s\\n\" % (reason,))\n\
         \x20   __stderr.flush()\n\
         \x20   __exit({denied_exit})\n\
         \n\
         def __scriptbox_audit(\n\
         \x20   event,\n\
         \x20   args,\n\
         \x20   __denied_modules=frozenset([{denied_modules}]),\n\
         \x20   __denied_events=frozenset([{denied_events}]),\n\
         \x20   __allowed_prefixes=tuple(\n\
         \x20       [{scratch}, __scriptbox_sys.prefix, __scriptbox_sys.base_prefix]\n\
         \x20       + [p for p in __scriptbox_sys.path if p]\n\
         \x20   ),\n\
         \x20   __deny=__scriptbox_deny,\n\
         \x20   __abspath=__scriptbox_os.path.abspath,\n\
         \x20   __str=str,\n\
         ):\n\
         \x20   if event == \"import\":\n\
         \x20       module = (args[0] or \"\").split(\".\")[0]\n\
         \x20       if module in __denied_modules:\n\
         \x20           __deny(\"import of module \" + module)\n\
         \x20   elif event == \"open\":\n\
         \x20       if \"open\" in __denied_events:\n\
         \x20           path = __abspath(__str(args[0]))\n\
         \x20           if not path.startswith(__allowed_prefixes):\n\
         \x20               __deny(\"file access outside the sandbox\")\n\
         \x20   elif event == \"exec\":\n\
         \x20       if \"exec\" in __denied_events and args[0].co_filename == \"<string>\":\n\
         \x20           __deny(\"dynamic code execution\")\n\
         \x20   elif event in __denied_events:\n\
         \x20       __deny(event)\n\
         \n\
         __scriptbox_sys.addaudithook(__scriptbox_audit)\n\
         \n",
        marker = DENIED_MARKER,
        denied_modules = denied_modules,
        denied_events = denied_events,
        scratch = scratch,
        denied_exit = DENIED_EXIT_CODE,
    )
}

/// Map denied callable names onto interpreter audit events. `eval` and
/// `exec` both surface as the `exec` event; `__import__` is covered by the
/// `import` event and the module denylist.
fn audit_events(denied_calls: &[String]) -> Vec<String> {
    let mut events = BTreeSet::new();
    for call in denied_calls {
        match call.as_str() {
            "eval" | "exec" => {
                events.insert("exec".to_string());
            }
            "__import__" => {}
            other => {
                events.insert(other.to_string());
            }
        }
    }
    events.into_iter().collect()
}

/// A JSON string is also a valid Python string literal for the paths and
/// names we embed.
fn py_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn py_string_list<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values.map(py_str).collect::<Vec<_>>().join(", ")
}
