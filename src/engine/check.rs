//! Semantic checks applied by the built-in engine after parsing.
//!
//! Every problem found is reported; a rule with at least one error is not
//! added to the context.

use super::parser::{CompareOp, Expr, RuleDecl, SourceFile};
use crate::diagnostic::Severity;
use std::collections::{HashMap, HashSet};

/// Modules the built-in engine can import. It ships none.
const KNOWN_MODULES: &[&str] = &[];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Type {
    Boolean,
    Integer,
    Text,
}

impl Type {
    fn name(self) -> &'static str {
        match self {
            Type::Boolean => "boolean",
            Type::Integer => "integer",
            Type::Text => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Finding {
    pub severity: Severity,
    pub line: u32,
    pub message: String,
}

/// What the context already knows when a new source is checked.
pub(crate) struct Scope<'a> {
    /// Rule identifiers already compiled into the target namespace.
    pub rules: &'a HashSet<String>,
    /// External variables defined on the context.
    pub externals: &'a HashMap<String, Type>,
}

pub(crate) struct CheckOutcome<'f> {
    pub accepted: Vec<&'f RuleDecl>,
    pub findings: Vec<Finding>,
}

impl CheckOutcome<'_> {
    pub(crate) fn error_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count()
    }
}

struct RuleChecker<'a> {
    scope: &'a Scope<'a>,
    local_rules: &'a HashSet<String>,
    strings: HashSet<&'a str>,
    referenced: HashSet<String>,
    uses_them: bool,
    findings: Vec<Finding>,
}

impl<'a> RuleChecker<'a> {
    fn error(&mut self, line: u32, message: String) {
        self.findings.push(Finding {
            severity: Severity::Error,
            line,
            message,
        });
    }

    fn check_expr(&mut self, expr: &Expr) -> Option<Type> {
        match expr {
            Expr::Bool(_) => Some(Type::Boolean),
            Expr::Integer(_) | Expr::Filesize => Some(Type::Integer),
            Expr::Text(_) => Some(Type::Text),
            Expr::StringMatch { id, line } | Expr::StringCount { id, line } => {
                if self.strings.contains(id.as_str()) {
                    self.referenced.insert(id.clone());
                } else {
                    self.error(*line, format!("undefined string identifier \"${id}\""));
                }
                if matches!(expr, Expr::StringMatch { .. }) {
                    Some(Type::Boolean)
                } else {
                    Some(Type::Integer)
                }
            }
            Expr::Identifier { name, line } => {
                if let Some(ty) = self.scope.externals.get(name) {
                    Some(*ty)
                } else if self.scope.rules.contains(name) || self.local_rules.contains(name) {
                    Some(Type::Boolean)
                } else {
                    self.error(*line, format!("undefined identifier \"{name}\""));
                    None
                }
            }
            Expr::OfThem { line, .. } => {
                if self.strings.is_empty() {
                    self.error(*line, "\"them\" used in a rule without strings".to_string());
                }
                self.uses_them = true;
                Some(Type::Boolean)
            }
            Expr::Not(inner) => {
                self.check_expr(inner);
                Some(Type::Boolean)
            }
            Expr::And(operands) | Expr::Or(operands) => {
                for operand in operands {
                    self.check_expr(operand);
                }
                Some(Type::Boolean)
            }
            Expr::Compare { op, lhs, rhs, line } => {
                let left = self.check_expr(lhs);
                let right = self.check_expr(rhs);
                let (Some(left), Some(right)) = (left, right) else {
                    return Some(Type::Boolean);
                };
                let valid = match op {
                    CompareOp::Eq | CompareOp::Ne => left == right,
                    CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
                        left == Type::Integer && right == Type::Integer
                    }
                    CompareOp::Contains => left == Type::Text && right == Type::Text,
                };
                if !valid {
                    self.error(
                        *line,
                        format!(
                            "wrong type for operands of \"{}\": {} and {}",
                            op.symbol(),
                            left.name(),
                            right.name()
                        ),
                    );
                }
                Some(Type::Boolean)
            }
        }
    }
}

fn check_rule<'a>(
    rule: &'a RuleDecl,
    scope: &'a Scope<'a>,
    local_rules: &'a HashSet<String>,
) -> Vec<Finding> {
    let mut checker = RuleChecker {
        scope,
        local_rules,
        strings: HashSet::new(),
        referenced: HashSet::new(),
        uses_them: false,
        findings: Vec::new(),
    };

    for string in &rule.strings {
        if !checker.strings.insert(string.id.as_str()) {
            checker.error(
                string.line,
                format!("duplicated string identifier \"${}\"", string.id),
            );
        }
        if string.value.is_empty() {
            checker.error(string.line, format!("empty string \"${}\"", string.id));
        } else if string.value.len() < 2 {
            checker.findings.push(Finding {
                severity: Severity::Warning,
                line: string.line,
                message: format!("string \"${}\" may slow down scanning", string.id),
            });
        }
    }

    checker.check_expr(&rule.condition);

    if !checker.uses_them {
        for string in &rule.strings {
            if !checker.referenced.contains(&string.id) {
                checker.error(
                    string.line,
                    format!("unreferenced string identifier \"${}\"", string.id),
                );
            }
        }
    }

    checker.findings
}

/// Check a parsed source against what the context already contains.
pub(crate) fn check_source<'f>(file: &'f SourceFile, scope: &Scope<'_>) -> CheckOutcome<'f> {
    let mut findings = Vec::new();
    let mut accepted = Vec::new();

    for import in &file.imports {
        if !KNOWN_MODULES.contains(&import.module.as_str()) {
            findings.push(Finding {
                severity: Severity::Error,
                line: import.line,
                message: format!("unknown module \"{}\"", import.module),
            });
        }
    }

    let mut local_rules = HashSet::new();
    for rule in &file.rules {
        let mut rule_findings = Vec::new();
        let duplicated = scope.rules.contains(&rule.identifier)
            || scope.externals.contains_key(&rule.identifier)
            || local_rules.contains(&rule.identifier);
        if duplicated {
            rule_findings.push(Finding {
                severity: Severity::Error,
                line: rule.line,
                message: format!("duplicated identifier \"{}\"", rule.identifier),
            });
        }

        rule_findings.extend(check_rule(rule, scope, &local_rules));

        let failed = rule_findings.iter().any(|f| f.severity == Severity::Error);
        findings.extend(rule_findings);
        if !failed {
            local_rules.insert(rule.identifier.clone());
            accepted.push(rule);
        }
    }

    CheckOutcome { accepted, findings }
}
