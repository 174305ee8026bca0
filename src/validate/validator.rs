/// Static validation of submitted scripts.
///
/// Parses the script into an AST and walks it for policy violations. Pure
/// function of (script, policy); no execution, no I/O. Matching is lexical:
/// dynamic constructs that only resolve to a denied name at runtime (aliasing,
/// getattr indirection) are out of reach here and are caught by the runtime
/// interception layer of the fallback strategy instead.
use crate::config::policy::SecurityPolicy;
use rustpython_parser::{ast, parse, Mode};
use std::fmt;

/// Violation kinds, closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    SyntaxError,
    MissingEntryPoint,
    DeniedImport,
    DeniedCall,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::SyntaxError => write!(f, "syntax error"),
            ViolationKind::MissingEntryPoint => write!(f, "missing entry point"),
            ViolationKind::DeniedImport => write!(f, "denied import"),
            ViolationKind::DeniedCall => write!(f, "denied call"),
        }
    }
}

/// A single policy violation with a human-readable location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub description: String,
    /// 1-based source line
    pub line: usize,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {}): {}", self.kind, self.line, self.description)
    }
}

/// Result of static validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted,
    Rejected(Vec<Violation>),
}

/// Validate a script against the policy.
///
/// A parse failure short-circuits with a single syntax violation. Otherwise
/// the walk is exhaustive: every denied import and denied call in the tree is
/// collected so the caller sees the full violation set.
pub fn validate(script: &str, policy: &SecurityPolicy) -> ValidationOutcome {
    let parsed = match parse(script, Mode::Module, "<submission>") {
        Ok(parsed) => parsed,
        Err(err) => {
            let line = line_of(script, usize::from(err.offset));
            return ValidationOutcome::Rejected(vec![Violation {
                kind: ViolationKind::SyntaxError,
                description: format!("invalid syntax: {}", err.error),
                line,
            }]);
        }
    };

    let body = match parsed {
        ast::Mod::Module(module) => module.body,
        _ => Vec::new(),
    };

    let mut walker = Walker {
        policy,
        source: script,
        violations: Vec::new(),
        entry_point: None,
    };
    for stmt in &body {
        walker.top_level(stmt);
    }
    for stmt in &body {
        walker.stmt(stmt);
    }

    match walker.entry_point {
        Some(true) => {}
        Some(false) => walker.violations.insert(
            0,
            Violation {
                kind: ViolationKind::MissingEntryPoint,
                description: format!(
                    "entry point `{}` must take no required arguments",
                    policy.entry_point
                ),
                line: 1,
            },
        ),
        None => walker.violations.insert(
            0,
            Violation {
                kind: ViolationKind::MissingEntryPoint,
                description: format!(
                    "script must define a top-level `{}()` function",
                    policy.entry_point
                ),
                line: 1,
            },
        ),
    }

    if walker.violations.is_empty() {
        ValidationOutcome::Accepted
    } else {
        ValidationOutcome::Rejected(walker.violations)
    }
}

struct Walker<'a> {
    policy: &'a SecurityPolicy,
    source: &'a str,
    violations: Vec<Violation>,
    /// None: not seen; Some(true): usable; Some(false): wrong signature
    entry_point: Option<bool>,
}

impl<'a> Walker<'a> {
    /// Entry-point detection only looks at module scope.
    fn top_level(&mut self, stmt: &ast::Stmt) {
        if let ast::Stmt::FunctionDef(def) = stmt {
            if def.name.as_str() == self.policy.entry_point {
                let usable = required_arg_count(&def.args) == 0;
                // A later definition with a usable signature wins, matching
                // how the interpreter rebinds the name.
                if self.entry_point != Some(true) || !usable {
                    self.entry_point = Some(usable);
                }
            }
        }
    }

    fn violation(&mut self, kind: ViolationKind, description: String, offset: usize) {
        self.violations.push(Violation {
            kind,
            description,
            line: line_of(self.source, offset),
        });
    }

    fn stmts(&mut self, stmts: &[ast::Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &ast::Stmt) {
        match stmt {
            ast::Stmt::Import(s) => {
                for alias in &s.names {
                    let name = alias.name.as_str();
                    if self.policy.is_denied_module(name) {
                        self.violation(
                            ViolationKind::DeniedImport,
                            format!("import of denied module `{}`", name),
                            usize::from(s.range.start()),
                        );
                    }
                }
            }
            ast::Stmt::ImportFrom(s) => {
                if let Some(module) = &s.module {
                    if self.policy.is_denied_module(module.as_str()) {
                        self.violation(
                            ViolationKind::DeniedImport,
                            format!("import from denied module `{}`", module.as_str()),
                            usize::from(s.range.start()),
                        );
                    }
                }
            }
            ast::Stmt::FunctionDef(s) => self.stmts(&s.body),
            ast::Stmt::AsyncFunctionDef(s) => self.stmts(&s.body),
            ast::Stmt::ClassDef(s) => self.stmts(&s.body),
            ast::Stmt::Return(s) => {
                if let Some(value) = &s.value {
                    self.expr(value);
                }
            }
            ast::Stmt::Assign(s) => {
                for target in &s.targets {
                    self.expr(target);
                }
                self.expr(&s.value);
            }
            ast::Stmt::AugAssign(s) => {
                self.expr(&s.target);
                self.expr(&s.value);
            }
            ast::Stmt::AnnAssign(s) => {
                if let Some(value) = &s.value {
                    self.expr(value);
                }
            }
            ast::Stmt::For(s) => {
                self.expr(&s.iter);
                self.stmts(&s.body);
                self.stmts(&s.orelse);
            }
            ast::Stmt::AsyncFor(s) => {
                self.expr(&s.iter);
                self.stmts(&s.body);
                self.stmts(&s.orelse);
            }
            ast::Stmt::While(s) => {
                self.expr(&s.test);
                self.stmts(&s.body);
                self.stmts(&s.orelse);
            }
            ast::Stmt::If(s) => {
                self.expr(&s.test);
                self.stmts(&s.body);
                self.stmts(&s.orelse);
            }
            ast::Stmt::With(s) => {
                for item in &s.items {
                    self.expr(&item.context_expr);
                }
                self.stmts(&s.body);
            }
            ast::Stmt::AsyncWith(s) => {
                for item in &s.items {
                    self.expr(&item.context_expr);
                }
                self.stmts(&s.body);
            }
            ast::Stmt::Try(s) => {
                self.stmts(&s.body);
                for handler in &s.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    self.stmts(&h.body);
                }
                self.stmts(&s.orelse);
                self.stmts(&s.finalbody);
            }
            ast::Stmt::Expr(s) => self.expr(&s.value),
            ast::Stmt::Raise(s) => {
                if let Some(exc) = &s.exc {
                    self.expr(exc);
                }
            }
            ast::Stmt::Assert(s) => self.expr(&s.test),
            _ => {}
        }
    }

    fn expr(&mut self, expr: &ast::Expr) {
        match expr {
            ast::Expr::Call(call) => {
                if let Some(callee) = dotted_name(&call.func) {
                    if self.policy.is_denied_call(&callee) {
                        self.violation(
                            ViolationKind::DeniedCall,
                            format!("call to denied function `{}`", callee),
                            usize::from(call.range.start()),
                        );
                    }
                    // `__import__("x")` with a constant argument is an import
                    // in call clothing; flag the module too.
                    if callee == "__import__" {
                        if let Some(ast::Expr::Constant(c)) = call.args.first() {
                            if let ast::Constant::Str(module) = &c.value {
                                if self.policy.is_denied_module(module) {
                                    self.violation(
                                        ViolationKind::DeniedImport,
                                        format!("dynamic import of denied module `{}`", module),
                                        usize::from(call.range.start()),
                                    );
                                }
                            }
                        }
                    }
                }
                self.expr(&call.func);
                for arg in &call.args {
                    self.expr(arg);
                }
                for kw in &call.keywords {
                    self.expr(&kw.value);
                }
            }
            ast::Expr::Attribute(a) => self.expr(&a.value),
            ast::Expr::BinOp(b) => {
                self.expr(&b.left);
                self.expr(&b.right);
            }
            ast::Expr::BoolOp(b) => {
                for value in &b.values {
                    self.expr(value);
                }
            }
            ast::Expr::UnaryOp(u) => self.expr(&u.operand),
            ast::Expr::Compare(c) => {
                self.expr(&c.left);
                for comparator in &c.comparators {
                    self.expr(comparator);
                }
            }
            ast::Expr::IfExp(e) => {
                self.expr(&e.test);
                self.expr(&e.body);
                self.expr(&e.orelse);
            }
            ast::Expr::Lambda(l) => self.expr(&l.body),
            ast::Expr::Subscript(s) => {
                self.expr(&s.value);
                self.expr(&s.slice);
            }
            ast::Expr::Starred(s) => self.expr(&s.value),
            ast::Expr::Await(a) => self.expr(&a.value),
            ast::Expr::List(l) => {
                for elt in &l.elts {
                    self.expr(elt);
                }
            }
            ast::Expr::Tuple(t) => {
                for elt in &t.elts {
                    self.expr(elt);
                }
            }
            ast::Expr::Set(s) => {
                for elt in &s.elts {
                    self.expr(elt);
                }
            }
            ast::Expr::Dict(d) => {
                for key in d.keys.iter().flatten() {
                    self.expr(key);
                }
                for value in &d.values {
                    self.expr(value);
                }
            }
            ast::Expr::JoinedStr(j) => {
                for value in &j.values {
                    self.expr(value);
                }
            }
            ast::Expr::FormattedValue(v) => self.expr(&v.value),
            ast::Expr::NamedExpr(n) => {
                self.expr(&n.target);
                self.expr(&n.value);
            }
            ast::Expr::ListComp(c) => {
                self.expr(&c.elt);
                self.comprehensions(&c.generators);
            }
            ast::Expr::SetComp(c) => {
                self.expr(&c.elt);
                self.comprehensions(&c.generators);
            }
            ast::Expr::DictComp(c) => {
                self.expr(&c.key);
                self.expr(&c.value);
                self.comprehensions(&c.generators);
            }
            ast::Expr::GeneratorExp(g) => {
                self.expr(&g.elt);
                self.comprehensions(&g.generators);
            }
            _ => {}
        }
    }

    fn comprehensions(&mut self, generators: &[ast::Comprehension]) {
        for gen in generators {
            self.expr(&gen.iter);
            for cond in &gen.ifs {
                self.expr(cond);
            }
        }
    }
}

/// Resolve a callee expression to a dotted name, e.g. `os.path.join`.
/// Returns None for callees that are not plain name/attribute chains.
fn dotted_name(expr: &ast::Expr) -> Option<String> {
    match expr {
        ast::Expr::Name(name) => Some(name.id.to_string()),
        ast::Expr::Attribute(attr) => {
            dotted_name(&attr.value).map(|base| format!("{}.{}", base, attr.attr.as_str()))
        }
        _ => None,
    }
}

/// Count parameters without defaults; the entry point must have none.
fn required_arg_count(args: &ast::Arguments) -> usize {
    args.posonlyargs
        .iter()
        .chain(args.args.iter())
        .chain(args.kwonlyargs.iter())
        .filter(|arg| arg.default.is_none())
        .count()
}

/// 1-based line for a byte offset.
fn line_of(source: &str, offset: usize) -> usize {
    let end = offset.min(source.len());
    source[..end].bytes().filter(|b| *b == b'\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::policy::SecurityPolicy;

    fn policy() -> SecurityPolicy {
        SecurityPolicy::default()
    }

    fn rejected(script: &str) -> Vec<Violation> {
        match validate(script, &policy()) {
            ValidationOutcome::Rejected(violations) => violations,
            ValidationOutcome::Accepted => panic!("expected rejection for: {}", script),
        }
    }

    #[test]
    fn accepts_minimal_script() {
        let outcome = validate("def main():\n    return {\"message\": \"hi\"}\n", &policy());
        assert_eq!(outcome, ValidationOutcome::Accepted);
    }

    #[test]
    fn accepts_empty_body_entry_point() {
        // Absence of dangerous constructs is the bar, not absence of all risk.
        let outcome = validate("def main():\n    pass\n", &policy());
        assert_eq!(outcome, ValidationOutcome::Accepted);
    }

    #[test]
    fn syntax_error_short_circuits() {
        let violations = rejected("def main(:\n    return 1\n");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::SyntaxError);
    }

    #[test]
    fn missing_entry_point_is_rejected() {
        let violations = rejected("def helper():\n    return 1\n");
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::MissingEntryPoint));
    }

    #[test]
    fn entry_point_with_required_args_is_rejected() {
        let violations = rejected("def main(x):\n    return x\n");
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::MissingEntryPoint));
    }

    #[test]
    fn entry_point_with_defaulted_args_is_accepted() {
        let outcome = validate("def main(x=1):\n    return x\n", &policy());
        assert_eq!(outcome, ValidationOutcome::Accepted);
    }

    #[test]
    fn bare_import_of_denied_module() {
        let violations = rejected("import subprocess\ndef main():\n    return 1\n");
        assert!(violations.iter().any(|v| {
            v.kind == ViolationKind::DeniedImport && v.description.contains("subprocess")
        }));
    }

    #[test]
    fn aliased_import_of_denied_module() {
        let violations = rejected("import subprocess as sp\ndef main():\n    return 1\n");
        assert!(violations
            .iter()
            .any(|v| v.description.contains("subprocess")));
    }

    #[test]
    fn from_import_of_denied_module() {
        let violations = rejected("from subprocess import run\ndef main():\n    return 1\n");
        assert!(violations
            .iter()
            .any(|v| v.description.contains("subprocess")));
    }

    #[test]
    fn submodule_import_of_denied_module() {
        let violations = rejected("import subprocess.popen2\ndef main():\n    return 1\n");
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::DeniedImport));
    }

    #[test]
    fn bare_denied_call() {
        let violations = rejected("def main():\n    return eval(\"1\")\n");
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::DeniedCall && v.description.contains("eval")));
    }

    #[test]
    fn qualified_denied_call() {
        let violations =
            rejected("import os\ndef main():\n    os.system(\"id\")\n    return 1\n");
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::DeniedCall && v.description.contains("os.system")));
    }

    #[test]
    fn dunder_import_with_constant_names_module() {
        let violations =
            rejected("def main():\n    m = __import__(\"subprocess\")\n    return 1\n");
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::DeniedCall));
        assert!(violations.iter().any(|v| {
            v.kind == ViolationKind::DeniedImport && v.description.contains("subprocess")
        }));
    }

    #[test]
    fn collection_is_exhaustive_not_fail_fast() {
        let script = "import subprocess\nimport glob\ndef main():\n    eval(\"1\")\n    return 1\n";
        let violations = rejected(script);
        let imports = violations
            .iter()
            .filter(|v| v.kind == ViolationKind::DeniedImport)
            .count();
        let calls = violations
            .iter()
            .filter(|v| v.kind == ViolationKind::DeniedCall)
            .count();
        assert_eq!(imports, 2);
        assert_eq!(calls, 1);
    }

    #[test]
    fn denied_call_inside_nested_constructs() {
        let script = "def main():\n    for i in range(3):\n        if i > 1:\n            with open(\"x\") as fh:\n                return fh\n    return 1\n";
        let violations = rejected(script);
        assert!(violations
            .iter()
            .any(|v| v.description.contains("open")));
    }

    #[test]
    fn violations_carry_line_numbers() {
        let violations = rejected("def main():\n    return 1\n\nimport subprocess\n");
        let import = violations
            .iter()
            .find(|v| v.kind == ViolationKind::DeniedImport)
            .unwrap();
        assert_eq!(import.line, 4);
    }

    #[test]
    fn validation_is_deterministic() {
        let script = "import glob\ndef main():\n    return 1\n";
        assert_eq!(validate(script, &policy()), validate(script, &policy()));
    }
}
