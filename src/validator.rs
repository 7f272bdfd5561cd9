//! Static checks run on every strategy source before any of it executes.
//!
//! Every check runs and every violation is reported, so an author sees all problems at once.
//! Only a source that does not parse stops early, since nothing else can be inspected.

use tracing::{debug, instrument};

use crate::configuration::Configuration;
use crate::script::{self, is_keyword, FunctionDef, Module, Stmt, StmtKind};
use crate::strategy::ValidationStatus;

/// Name of the parameter that receives the opponent's move history.
pub const HISTORY_PARAM: &str = "moves";

/// The only module strategy code may import.
pub const ALLOWED_MODULE: &str = "random";

/// Reason given when a source defines no function at all.
pub const NO_DECISION_LOGIC: &str = "strategy produced no usable decision logic";

/// Validates strategy sources against the structural rules of the tournament.
#[derive(Debug, Clone, Copy)]
pub struct StrategyValidator {
    literal_returns: bool,
    require_history_param: bool,
}

/// Validation result for one source, keeping the parsed functions for loading.
#[derive(Debug)]
pub(crate) struct SourceReport {
    /// Problems that concern the whole source (syntax, top-level imports, no function).
    pub source_reasons: Vec<String>,
    /// Every top-level function with the problems found in it.
    pub functions: Vec<(FunctionDef, Vec<String>)>,
}

impl SourceReport {
    fn status(&self) -> ValidationStatus {
        let reasons: Vec<String> = self
            .source_reasons
            .iter()
            .chain(self.functions.iter().flat_map(|(_, reasons)| reasons))
            .cloned()
            .collect();
        if reasons.is_empty() {
            ValidationStatus::Accepted
        } else {
            ValidationStatus::Rejected(reasons)
        }
    }
}

impl StrategyValidator {
    /// Validator applying the policies selected in `config`.
    pub fn new(config: &Configuration) -> Self {
        Self {
            literal_returns: config.literal_returns,
            require_history_param: config.require_history_param,
        }
    }

    /// Checks a whole source text. The source is accepted only if every function in it passes.
    pub fn validate(&self, source: &str) -> ValidationStatus {
        self.inspect(source).status()
    }

    #[instrument(skip_all)]
    pub(crate) fn inspect(&self, source: &str) -> SourceReport {
        let module = match script::parse(source) {
            Ok(module) => module,
            Err(err) => {
                debug!(%err, "source does not parse");
                return SourceReport {
                    source_reasons: vec![format!("syntax error: {err}")],
                    functions: vec![],
                };
            }
        };

        let mut source_reasons = vec![];
        check_module_imports(&module, &mut source_reasons);
        if module.functions().next().is_none() {
            source_reasons.push(NO_DECISION_LOGIC.to_string());
        }

        let functions = module
            .functions()
            .map(|def| {
                let reasons = self.check_function(def);
                (def.clone(), reasons)
            })
            .collect();

        SourceReport {
            source_reasons,
            functions,
        }
    }

    fn check_function(&self, def: &FunctionDef) -> Vec<String> {
        let mut reasons = vec![];
        let name = &def.name;

        if self.require_history_param && !def.params.iter().any(|p| p.name == HISTORY_PARAM) {
            if def.params.is_empty() {
                reasons.push(format!(
                    "missing parameter '{HISTORY_PARAM}': function '{name}' declares no parameters"
                ));
            } else {
                let declared = def
                    .params
                    .iter()
                    .map(|p| p.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                reasons.push(format!(
                    "missing parameter '{HISTORY_PARAM}': function '{name}' takes ({declared})"
                ));
            }
        }

        let mut returns = 0;
        walk(&def.body, &mut |stmt| match &stmt.kind {
            StmtKind::Return(value) => {
                returns += 1;
                if !self.literal_returns {
                    return;
                }
                match value {
                    Some(expr) if expr.is_literal() => {}
                    Some(_) => reasons.push(format!(
                        "line {}: function '{name}' returns a computed value; only literal return values are allowed",
                        stmt.line
                    )),
                    None => reasons.push(format!(
                        "line {}: function '{name}' uses a bare 'return'; only literal return values are allowed",
                        stmt.line
                    )),
                }
            }
            StmtKind::Assign { target, .. }
            | StmtKind::AugAssign { target, .. }
            | StmtKind::For { target, .. }
                if is_keyword(target) =>
            {
                reasons.push(format!(
                    "line {}: assignment to reserved keyword '{target}'",
                    stmt.line
                ));
            }
            StmtKind::Import(names) => {
                for module in names.iter().filter(|m| *m != ALLOWED_MODULE) {
                    reasons.push(forbidden_import(module, stmt.line));
                }
            }
            _ => {}
        });

        if returns == 0 {
            reasons.push(format!("function '{name}' has no return statement"));
        }

        reasons
    }
}

fn check_module_imports(module: &Module, reasons: &mut Vec<String>) {
    for (name, line) in module.imports() {
        if name != ALLOWED_MODULE {
            reasons.push(forbidden_import(name, line));
        }
    }
}

fn forbidden_import(module: &str, line: usize) -> String {
    format!("line {line}: import of '{module}' is not permitted; only '{ALLOWED_MODULE}' is available")
}

/// Visits every statement of `body`, nested blocks included, in source order.
fn walk<'a>(body: &'a [Stmt], visit: &mut impl FnMut(&'a Stmt)) {
    for stmt in body {
        visit(stmt);
        for block in stmt.kind.blocks() {
            walk(block, visit);
        }
    }
}
