use enclave_common::{AstIssue, IssueCode, Severity, SourceLocation};
use oxc::allocator::Allocator;
use oxc::ast::ast::{
    Argument, AssignmentTarget, Expression, MemberExpression, NewExpression, PropertyKey,
    SimpleAssignmentTarget, Statement,
};
use oxc::ast_visit::{Visit, walk};
use oxc::parser::Parser;
use oxc::span::{GetSpan, SourceType, Span};
use tracing::instrument;

use crate::constants::{ALLOWED_BUILTINS, FORBIDDEN_GLOBALS, is_reserved};

/// Result of running the validator over one program.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub issues: Vec<AstIssue>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.issues.iter().all(|i| i.severity != Severity::Error)
    }
}

/// Parse `source` and walk it for disallowed constructs.
///
/// `extra_allowed` names additional free identifiers the caller has
/// validated as safe globals (and their `__safe_<name>` aliases, which the
/// transformer may have introduced).
#[instrument(skip_all, level = "debug")]
pub fn validate(source: &str, extra_allowed: &[String]) -> ValidationOutcome {
    let allocator = Allocator::default();
    let source_type = SourceType::mjs();
    let parsed = Parser::new(&allocator, source, source_type).parse();

    let mut outcome = ValidationOutcome::default();

    if !parsed.errors.is_empty() {
        for err in &parsed.errors {
            outcome.issues.push(AstIssue::new(
                IssueCode::UnsafeConstruct,
                format!("parse error: {err}"),
                SourceLocation {
                    line: 0,
                    column: 0,
                    start: 0,
                    end: 0,
                },
            ));
        }
        return outcome;
    }

    let mut visitor = RuleWalker::new(source, extra_allowed, &mut outcome.issues);
    visitor.visit_program(&parsed.program);
    outcome
}

struct RuleWalker<'a, 'i> {
    source: &'a str,
    extra_allowed: &'a [String],
    issues: &'i mut Vec<AstIssue>,
    /// Incremented on entry to any function body, decremented on exit.
    /// Lets label-target checks tell a same-function `break`/`continue`
    /// apart from one that would have to cross a function boundary to
    /// reach its label — something real JS label scoping never permits,
    /// but this parser pass alone (no semantic/binding analysis) doesn't
    /// catch on its own.
    function_depth: u32,
    /// Labels currently in scope, paired with the `function_depth` they
    /// were declared at. A stack rather than a set: nested loops may
    /// reuse the same label text at different depths.
    label_scopes: Vec<(String, u32)>,
}

impl<'a, 'i> RuleWalker<'a, 'i> {
    fn new(source: &'a str, extra_allowed: &'a [String], issues: &'i mut Vec<AstIssue>) -> Self {
        Self {
            source,
            extra_allowed,
            issues,
            function_depth: 0,
            label_scopes: Vec::new(),
        }
    }

    /// Rejects a `break`/`continue` target whose label was declared at a
    /// different function depth than the jump itself, which can only mean
    /// the label lives outside the function the jump executes in.
    fn check_label_target(&mut self, name: &str, span: Span) {
        let declared_depth = self
            .label_scopes
            .iter()
            .rev()
            .find(|(label, _)| label == name)
            .map(|(_, depth)| *depth);
        if declared_depth != Some(self.function_depth) {
            self.push(
                IssueCode::UnsafeConstruct,
                format!("labeled jump to `{name}` crosses a function boundary"),
                span,
            );
        }
    }

    fn check_arguments_callee(&mut self, member: &MemberExpression) {
        if let MemberExpression::StaticMemberExpression(s) = member {
            if s.property.name.as_str() == "callee" {
                if let Expression::Identifier(obj) = &s.object {
                    if obj.name.as_str() == "arguments" {
                        self.push(
                            IssueCode::UnsafeConstruct,
                            "`arguments.callee` is forbidden",
                            s.span,
                        );
                    }
                }
            }
        }
    }

    fn location(&self, span: Span) -> SourceLocation {
        let start = span.start;
        let end = span.end;
        let prefix = &self.source[..(start as usize).min(self.source.len())];
        let line = prefix.bytes().filter(|b| *b == b'\n').count() as u32 + 1;
        let column = prefix
            .rfind('\n')
            .map(|idx| (start as usize) - idx - 1)
            .unwrap_or(start as usize) as u32;
        SourceLocation {
            line,
            column,
            start,
            end,
        }
    }

    fn push(&mut self, code: IssueCode, message: impl Into<String>, span: Span) {
        let location = self.location(span);
        self.issues.push(AstIssue::new(code, message, location));
    }

    fn is_identifier_allowed(&self, name: &str) -> bool {
        ALLOWED_BUILTINS.contains(&name)
            || self.extra_allowed.iter().any(|n| n == name)
            || name.starts_with("__safe_")
            || name.starts_with("__ag_")
    }

    /// Attempts constant-folding of a property key expression to a literal
    /// string, following exactly the enumerated rule set: string literals,
    /// `+`-concatenation chains of literals, and template literals with no
    /// substitutions. Anything else is treated as non-constant.
    fn fold_constant_key(&self, expr: &Expression) -> Option<String> {
        match expr {
            Expression::StringLiteral(s) => Some(s.value.to_string()),
            Expression::TemplateLiteral(t) if t.expressions.is_empty() => {
                Some(t.quasis.iter().map(|q| q.value.raw.as_str()).collect())
            }
            Expression::BinaryExpression(b) if b.operator.as_str() == "+" => {
                let left = self.fold_constant_key(&b.left)?;
                let right = self.fold_constant_key(&b.right)?;
                Some(format!("{left}{right}"))
            }
            _ => None,
        }
    }
}

impl<'a, 'i, 'ast> Visit<'ast> for RuleWalker<'a, 'i> {
    fn visit_identifier_reference(&mut self, it: &oxc::ast::ast::IdentifierReference<'ast>) {
        let name = it.name.as_str();
        if is_reserved(name) {
            // Reads of reserved names are tolerated only for the
            // transformer's own synthesized calls; declarations/writes are
            // rejected in visit_binding_identifier / visit_assignment_target.
        } else if name == "Symbol" {
            self.push(
                IssueCode::SymbolAccess,
                "reference to `Symbol` is forbidden",
                it.span,
            );
        } else if FORBIDDEN_GLOBALS.contains(&name) {
            self.push(
                IssueCode::GlobalNotAllowed,
                format!("reference to forbidden global `{name}`"),
                it.span,
            );
        } else if !self.is_identifier_allowed(name) {
            // Unknown identifiers are not automatically rejected here: they
            // may be locally bound (parameters, `let`/`const`, function
            // declarations). A full binding resolution pass is out of
            // scope for the walker; the closed allow-list above plus the
            // runtime's minimal-intrinsics context (enclave-runtime) is the
            // enforcement boundary for truly free names.
        }
    }

    fn visit_binding_identifier(&mut self, it: &oxc::ast::ast::BindingIdentifier<'ast>) {
        let name = it.name.as_str();
        if is_reserved(name) {
            self.push(
                IssueCode::ReservedPrefix,
                format!("declaration of reserved identifier `{name}`"),
                it.span,
            );
        }
    }

    fn visit_assignment_target(&mut self, it: &AssignmentTarget<'ast>) {
        if let AssignmentTarget::AssignmentTargetIdentifier(id) = it {
            if is_reserved(id.name.as_str()) {
                self.push(
                    IssueCode::ReservedPrefix,
                    format!("assignment to reserved identifier `{}`", id.name),
                    id.span,
                );
            }
        }
        if let Some(simple) = as_simple_member(it) {
            self.check_member_write(simple);
        }
        walk::walk_assignment_target(self, it);
    }

    fn visit_member_expression(&mut self, it: &MemberExpression<'ast>) {
        self.check_arguments_callee(it);
        self.check_member_read(it);
        walk::walk_member_expression(self, it);
    }

    fn visit_expression(&mut self, it: &Expression<'ast>) {
        match it {
            Expression::FunctionExpression(_) | Expression::ArrowFunctionExpression(_) => {
                self.function_depth += 1;
                walk::walk_expression(self, it);
                self.function_depth -= 1;
            }
            _ => walk::walk_expression(self, it),
        }
    }

    fn visit_labeled_statement(&mut self, it: &oxc::ast::ast::LabeledStatement<'ast>) {
        self.label_scopes
            .push((it.label.name.to_string(), self.function_depth));
        walk::walk_labeled_statement(self, it);
        self.label_scopes.pop();
    }

    fn visit_break_statement(&mut self, it: &oxc::ast::ast::BreakStatement<'ast>) {
        if let Some(label) = &it.label {
            self.check_label_target(label.name.as_str(), it.span);
        }
        walk::walk_break_statement(self, it);
    }

    fn visit_continue_statement(&mut self, it: &oxc::ast::ast::ContinueStatement<'ast>) {
        if let Some(label) = &it.label {
            self.check_label_target(label.name.as_str(), it.span);
        }
        walk::walk_continue_statement(self, it);
    }

    fn visit_new_expression(&mut self, it: &NewExpression<'ast>) {
        if let Expression::Identifier(id) = &it.callee {
            if id.name.as_str() == "Function" {
                self.push(
                    IssueCode::DynamicCode,
                    "`new Function(...)` constructs dynamic code",
                    it.span,
                );
            }
        }
        walk::walk_new_expression(self, it);
    }

    fn visit_call_expression(&mut self, it: &oxc::ast::ast::CallExpression<'ast>) {
        if let Expression::Identifier(id) = &it.callee {
            if id.name.as_str() == "eval" {
                self.push(
                    IssueCode::DynamicCode,
                    "call to `eval` is forbidden",
                    it.span,
                );
            }
        }
        if let Expression::StaticMemberExpression(member) = &it.callee {
            if member.property.name.as_str() == "setPrototypeOf"
                || member.property.name.as_str() == "getPrototypeOf"
                || member.property.name.as_str() == "create"
            {
                if let Expression::Identifier(obj) = &member.object {
                    if obj.name.as_str() == "Object" {
                        if let Some(Argument::SpreadElement(_)) = it.arguments.first() {
                            // spreads can't be proven null; reject below.
                        }
                        let first_is_non_null = it
                            .arguments
                            .first()
                            .map(|a| !matches!(a, Argument::NullLiteral(_)))
                            .unwrap_or(false);
                        if first_is_non_null {
                            self.push(
                                IssueCode::PrototypeAccess,
                                format!("`Object.{}` is forbidden", member.property.name),
                                it.span,
                            );
                        }
                    }
                }
            }
        }
        walk::walk_call_expression(self, it);
    }

    fn visit_with_statement(&mut self, it: &oxc::ast::ast::WithStatement<'ast>) {
        self.push(
            IssueCode::UnsafeConstruct,
            "`with` statements are forbidden",
            it.span,
        );
        walk::walk_with_statement(self, it);
    }

    fn visit_statement(&mut self, it: &Statement<'ast>) {
        if matches!(it, Statement::FunctionDeclaration(_)) {
            self.function_depth += 1;
            walk::walk_statement(self, it);
            self.function_depth -= 1;
            return;
        }
        walk::walk_statement(self, it);
    }
}

/// Unifies the static/computed member cases for read and write checks.
enum SimpleMember<'a, 'ast> {
    Static(&'a oxc::ast::ast::StaticMemberExpression<'ast>),
    Computed(&'a oxc::ast::ast::ComputedMemberExpression<'ast>),
}

fn as_simple_member<'a, 'ast>(target: &'a AssignmentTarget<'ast>) -> Option<SimpleMember<'a, 'ast>> {
    match target {
        AssignmentTarget::SimpleAssignmentTarget(SimpleAssignmentTarget::MemberAssignmentTarget(
            m,
        )) => match &**m {
            MemberExpression::StaticMemberExpression(s) => Some(SimpleMember::Static(s)),
            MemberExpression::ComputedMemberExpression(c) => Some(SimpleMember::Computed(c)),
            _ => None,
        },
        _ => None,
    }
}

impl<'a, 'i> RuleWalker<'a, 'i> {
    fn check_member_write(&mut self, member: SimpleMember<'_, '_>) {
        match member {
            SimpleMember::Static(s) => self.check_static_name(s.property.name.as_str(), s.span),
            SimpleMember::Computed(c) => {
                if let Some(key) = self.fold_constant_key(&c.expression) {
                    self.check_static_name(&key, c.span);
                }
            }
        }
    }

    fn check_member_read(&mut self, member: &MemberExpression) {
        match member {
            MemberExpression::StaticMemberExpression(s) => {
                self.check_static_name(s.property.name.as_str(), s.span);
            }
            MemberExpression::ComputedMemberExpression(c) => {
                if let Some(key) = self.fold_constant_key(&c.expression) {
                    self.check_static_name(&key, c.span);
                }
            }
            MemberExpression::PrivateFieldExpression(_) => {}
        }
    }

    fn check_static_name(&mut self, name: &str, span: Span) {
        match name {
            "constructor" => self.push(
                IssueCode::ConstructorAccess,
                "access to `.constructor` is forbidden",
                span,
            ),
            "__proto__" => self.push(
                IssueCode::PrototypeAccess,
                "access to `__proto__` is forbidden",
                span,
            ),
            "Symbol" => self.push(
                IssueCode::SymbolAccess,
                "access to `Symbol` is forbidden",
                span,
            ),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issues_for(src: &str) -> Vec<IssueCode> {
        validate(src, &[]).issues.into_iter().map(|i| i.code).collect()
    }

    #[test]
    fn rejects_eval() {
        let issues = issues_for("return eval('1+1')");
        assert!(issues.contains(&IssueCode::DynamicCode));
    }

    #[test]
    fn rejects_constructor_access() {
        let issues = issues_for("return ({}).constructor");
        assert!(issues.contains(&IssueCode::ConstructorAccess));
    }

    #[test]
    fn rejects_proto_access() {
        let issues = issues_for("return ({}).__proto__");
        assert!(issues.contains(&IssueCode::PrototypeAccess));
    }

    #[test]
    fn rejects_reserved_declaration() {
        let issues = issues_for("let __safe_x = 1; return __safe_x;");
        assert!(issues.contains(&IssueCode::ReservedPrefix));
    }

    #[test]
    fn allows_plain_arithmetic() {
        let issues = issues_for("return 1 + 1;");
        assert!(issues.is_empty());
    }

    #[test]
    fn rejects_folded_constructor_key() {
        let issues = issues_for("const k = 'con' + 'structor'; return Array[k];");
        assert!(issues.contains(&IssueCode::ConstructorAccess));
    }

    #[test]
    fn rejects_object_create_with_custom_prototype() {
        let issues = issues_for("return Object.create({evil: true});");
        assert!(issues.contains(&IssueCode::PrototypeAccess));
    }

    #[test]
    fn allows_object_create_null() {
        let issues = issues_for("return Object.create(null);");
        assert!(!issues.contains(&IssueCode::PrototypeAccess));
    }

    #[test]
    fn rejects_bare_symbol_reference() {
        let issues = issues_for("return Symbol;");
        assert!(issues.contains(&IssueCode::SymbolAccess));
        assert!(!issues.contains(&IssueCode::GlobalNotAllowed));
    }

    #[test]
    fn rejects_arguments_callee() {
        let issues = issues_for("function f() { return arguments.callee; } return f();");
        assert!(issues.contains(&IssueCode::UnsafeConstruct));
    }

    #[test]
    fn rejects_label_break_crossing_function_boundary() {
        let issues = issues_for(
            "outer: for (let i=0;i<1;i++) { const f = () => { break outer; }; f(); } return 1;",
        );
        assert!(issues.contains(&IssueCode::UnsafeConstruct));
    }

    #[test]
    fn allows_label_break_within_same_function() {
        let issues = issues_for("outer: for (let i=0;i<1;i++) { break outer; } return 1;");
        assert!(!issues.contains(&IssueCode::UnsafeConstruct));
    }
}
