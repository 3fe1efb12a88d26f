//! # Formula Evaluator
//!
//! Direct-evaluating recursive descent over the token stream. Precedence,
//! lowest to highest: additive, multiplicative, power (left-associative),
//! unary minus, postfix (`.field`, `.method(...)`, `[index]`), primary.
//!
//! The same evaluator serves entry formulas and widget expressions; the
//! bindings decide which identifiers resolve and which collection rules
//! apply (empty aggregations yield 0 in widget context and error in entry
//! context; arithmetic on collection-shaped operands is a widget-context
//! error).

use std::collections::HashMap;

use super::lexer::{tokenize, Token};
use super::value::{ArithOp, EvalValue, Scalar};
use crate::config::EvalLimits;
use crate::entry::{ResolvedEntry, ScalarValue};
use crate::schema::SchemaCatalog;
use crate::widget::loader::LoadedEntry;

/// Legal base letters for `time(base)`
pub const TIME_BASES: [&str; 4] = ["t", "m", "p", "n"];

/// Name of the conventional multi-valued time-allocation field
pub const TIME_TYPE_FIELD: &str = "time_type";

/// Evaluation mode: decides collection rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    Entry,
    Widget,
}

/// Bindings for entry-context evaluation
#[derive(Debug)]
pub struct EntryBindings<'a> {
    /// `self` in formulas
    pub current: &'a ResolvedEntry,
    /// First-level tree parent (an attribute parent navigates to null)
    pub parent: Option<&'a ResolvedEntry>,
    pub root: &'a ResolvedEntry,
    /// Hierarchy vectors rendered as `/`-joined strings
    pub path: String,
    pub division: String,
    pub subdivision: String,
    /// Results of formulas already evaluated on the same node
    pub field_values: &'a HashMap<String, Scalar>,
}

/// Bindings for widget-context evaluation
#[derive(Debug)]
pub struct WidgetBindings<'a> {
    /// The dataset alias declared in the widget definition
    pub alias: &'a str,
    pub entries: &'a [LoadedEntry],
}

/// Evaluate an entry formula. Returns the raw evaluation value; the
/// formula applier enforces the single-scalar result rule.
pub fn eval_entry_formula<'a>(
    formula: &str,
    catalog: &'a SchemaCatalog,
    bindings: &EntryBindings<'a>,
    limits: &EvalLimits,
) -> Result<EvalValue<'a>, String> {
    Evaluator::new(
        formula,
        EvalMode::Entry,
        Some(catalog),
        Some(bindings),
        None,
        limits,
    )?
    .run()
}

/// Evaluate a widget expression against a loaded collection.
pub fn eval_widget_expr<'a>(
    expr: &str,
    bindings: &WidgetBindings<'a>,
    limits: &EvalLimits,
) -> Result<EvalValue<'a>, String> {
    Evaluator::new(expr, EvalMode::Widget, None, None, Some(bindings), limits)?.run()
}

struct Evaluator<'a, 'b> {
    tokens: Vec<Token>,
    pos: usize,
    mode: EvalMode,
    catalog: Option<&'a SchemaCatalog>,
    entry: Option<&'b EntryBindings<'a>>,
    widget: Option<&'b WidgetBindings<'a>>,
    depth: usize,
    max_depth: usize,
}

impl<'a, 'b> Evaluator<'a, 'b> {
    fn new(
        source: &str,
        mode: EvalMode,
        catalog: Option<&'a SchemaCatalog>,
        entry: Option<&'b EntryBindings<'a>>,
        widget: Option<&'b WidgetBindings<'a>>,
        limits: &EvalLimits,
    ) -> Result<Self, String> {
        if source.len() > limits.max_formula_length {
            return Err(format!(
                "formula exceeds {} characters",
                limits.max_formula_length
            ));
        }
        let tokens = tokenize(source)?;
        Ok(Evaluator {
            tokens,
            pos: 0,
            mode,
            catalog,
            entry,
            widget,
            depth: 0,
            max_depth: limits.max_eval_depth,
        })
    }

    fn run(&mut self) -> Result<EvalValue<'a>, String> {
        if self.tokens.is_empty() {
            return Err("empty formula".to_string());
        }
        let value = self.parse_expr()?;
        match self.peek() {
            None => Ok(value),
            Some(tok) => Err(format!("unexpected token '{}'", tok)),
        }
    }

    fn broadcast(&self) -> bool {
        self.mode == EvalMode::Entry
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        match self.advance() {
            Some(tok) if tok == *expected => Ok(()),
            Some(tok) => Err(format!("expected '{}', found '{}'", expected, tok)),
            None => Err(format!("expected '{}', found end of formula", expected)),
        }
    }

    // ------------------------------------------------------------------
    // Grammar
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<EvalValue<'a>, String> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(format!(
                "expression nested deeper than {} levels",
                self.max_depth
            ));
        }
        let value = self.parse_additive();
        self.depth -= 1;
        value
    }

    fn parse_additive(&mut self) -> Result<EvalValue<'a>, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = EvalValue::arith(op, lhs, rhs, self.broadcast())?;
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<EvalValue<'a>, String> {
        let mut lhs = self.parse_power()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                Some(Token::SlashSlash) => ArithOp::FloorDiv,
                Some(Token::Percent) => ArithOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_power()?;
            lhs = EvalValue::arith(op, lhs, rhs, self.broadcast())?;
        }
        Ok(lhs)
    }

    // `^` chains evaluate left to right
    fn parse_power(&mut self) -> Result<EvalValue<'a>, String> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::Caret) {
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = EvalValue::arith(ArithOp::Pow, lhs, rhs, self.broadcast())?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<EvalValue<'a>, String> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            let value = self.parse_unary()?;
            return value.negate(self.broadcast());
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<EvalValue<'a>, String> {
        let mut value = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let name = match self.advance() {
                        Some(Token::Ident(name)) => name,
                        Some(tok) => {
                            return Err(format!("expected identifier after '.', found '{}'", tok))
                        }
                        None => return Err("expected identifier after '.'".to_string()),
                    };
                    value = match name.as_str() {
                        "where" => {
                            self.expect(&Token::LParen)?;
                            let predicate = self.capture_until_matching_paren()?;
                            self.apply_where(value, &predicate)?
                        }
                        "time" => {
                            self.expect(&Token::LParen)?;
                            let arg = self.parse_expr()?;
                            self.expect(&Token::RParen)?;
                            self.apply_time(value, arg)?
                        }
                        _ => self.navigate(value, &name)?,
                    };
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    value = self.index(value, index)?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_primary(&mut self) -> Result<EvalValue<'a>, String> {
        match self.advance() {
            Some(Token::LParen) => {
                let value = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(value)
            }
            Some(Token::Number(n)) => Ok(EvalValue::Num(n)),
            Some(Token::Str(s)) => Ok(EvalValue::Str(s)),
            Some(Token::Ident(name)) => {
                let is_aggregation =
                    matches!(name.as_str(), "sum" | "avg" | "min" | "max" | "count");
                if is_aggregation && self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let arg = self.parse_expr()?;
                    self.expect(&Token::RParen)?;
                    return self.aggregate(&name, arg);
                }
                self.resolve_identifier(&name)
            }
            Some(tok) => Err(format!("unexpected token '{}'", tok)),
            None => Err("unexpected end of formula".to_string()),
        }
    }

    /// Collect the tokens of a `where(...)` predicate verbatim up to the
    /// matching close paren (which is consumed, not collected).
    fn capture_until_matching_paren(&mut self) -> Result<Vec<Token>, String> {
        let mut depth = 1usize;
        let mut captured = Vec::new();
        loop {
            match self.advance() {
                Some(Token::LParen) => {
                    depth += 1;
                    captured.push(Token::LParen);
                }
                Some(Token::RParen) => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(captured);
                    }
                    captured.push(Token::RParen);
                }
                Some(tok) => captured.push(tok),
                None => return Err("unterminated where(...)".to_string()),
            }
        }
    }

    // ------------------------------------------------------------------
    // Identifier resolution
    // ------------------------------------------------------------------

    fn resolve_identifier(&self, name: &str) -> Result<EvalValue<'a>, String> {
        match self.mode {
            EvalMode::Entry => {
                let bindings = self.entry.ok_or("missing entry bindings")?;
                match name {
                    "self" => Ok(EvalValue::Entry(bindings.current)),
                    "parent" => Ok(bindings
                        .parent
                        .map_or(EvalValue::Null, EvalValue::Entry)),
                    "root" => Ok(EvalValue::Entry(bindings.root)),
                    "path" => Ok(EvalValue::Str(bindings.path.clone())),
                    "division" => Ok(EvalValue::Str(bindings.division.clone())),
                    "subdivision" => Ok(EvalValue::Str(bindings.subdivision.clone())),
                    _ => bindings
                        .field_values
                        .get(name)
                        .map(Scalar::to_value)
                        .ok_or_else(|| format!("unknown identifier '{}'", name)),
                }
            }
            EvalMode::Widget => {
                let bindings = self.widget.ok_or("missing widget bindings")?;
                if name == bindings.alias {
                    Ok(EvalValue::Collection(bindings.entries))
                } else {
                    Err(format!("unknown identifier '{}'", name))
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Aggregation
    // ------------------------------------------------------------------

    fn aggregate(&self, func: &str, arg: EvalValue<'a>) -> Result<EvalValue<'a>, String> {
        // count works on any list shape; the numeric aggregations need
        // numbers
        let numbers: Option<Vec<f64>> = match &arg {
            EvalValue::Num(n) => Some(vec![*n]),
            EvalValue::NumList(ns) => Some(ns.clone()),
            EvalValue::Null => Some(Vec::new()),
            _ => None,
        };
        let count: Option<usize> = match &arg {
            EvalValue::Num(_) => Some(1),
            EvalValue::Null => Some(0),
            EvalValue::NumList(ns) => Some(ns.len()),
            EvalValue::StrList(ss) => Some(ss.len()),
            EvalValue::BoolList(bs) => Some(bs.len()),
            EvalValue::Entries(es) => Some(es.len()),
            EvalValue::Collection(c) => Some(c.len()),
            _ => None,
        };

        if func == "count" {
            let n = count.ok_or_else(|| format!("count() cannot apply to {}", arg.kind()))?;
            if n == 0 && self.mode == EvalMode::Entry {
                return Err("aggregation over empty input".to_string());
            }
            return Ok(EvalValue::Num(n as f64));
        }

        let ns = numbers
            .ok_or_else(|| format!("{}() requires numeric operands, got {}", func, arg.kind()))?;
        if ns.is_empty() {
            return match self.mode {
                EvalMode::Entry => Err("aggregation over empty input".to_string()),
                // empty collections keep widget fields defined
                EvalMode::Widget => Ok(EvalValue::Num(0.0)),
            };
        }
        let value = match func {
            "sum" => ns.iter().sum(),
            "avg" => ns.iter().sum::<f64>() / ns.len() as f64,
            "min" => ns.iter().copied().fold(f64::INFINITY, f64::min),
            "max" => ns.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            _ => return Err(format!("unknown aggregation '{}'", func)),
        };
        Ok(EvalValue::Num(value))
    }

    // ------------------------------------------------------------------
    // Field navigation
    // ------------------------------------------------------------------

    fn navigate(&self, value: EvalValue<'a>, name: &str) -> Result<EvalValue<'a>, String> {
        match value {
            EvalValue::Null => Ok(EvalValue::Null),
            EvalValue::Entry(entry) => self.navigate_entry(entry, name),
            EvalValue::Entries(entries) => self.navigate_entries(&entries, name),
            EvalValue::Collection(entries) => Ok(collection_field(entries, name)),
            other => Err(format!("cannot navigate '.{}' on {}", name, other.kind())),
        }
    }

    /// `.field` on a single entry reference: collect the children tagged
    /// with the named field. All-attribute children produce their typed
    /// values (length one collapses to the scalar), all-metric children
    /// produce entry references, anything else is null.
    fn navigate_entry(&self, node: &'a ResolvedEntry, name: &str) -> Result<EvalValue<'a>, String> {
        let catalog = self
            .catalog
            .ok_or("field navigation requires a schema context")?;
        let Some(field) = catalog.field_of_metric_by_name(node.entry.definition, name) else {
            // unknown field, or an attribute node (attributes have no
            // fields)
            return Ok(EvalValue::Null);
        };
        let children: Vec<&ResolvedEntry> = node.children_of_field(field.id).collect();
        if children.is_empty() {
            return Ok(EvalValue::Null);
        }
        if children.iter().all(|c| c.is_attribute()) {
            let mut values = Vec::with_capacity(children.len());
            for child in &children {
                let attr = child.attribute.as_ref().ok_or("missing attribute")?;
                match attr.value.get() {
                    Some(scalar) => values.push(scalar_to_value(scalar)),
                    None => return Ok(EvalValue::Null),
                }
            }
            return collapse_values(values, name);
        }
        if children.iter().all(|c| c.is_metric()) {
            return Ok(if children.len() == 1 {
                EvalValue::Entry(children[0])
            } else {
                EvalValue::Entries(children)
            });
        }
        Ok(EvalValue::Null)
    }

    /// `.field` on an entry list distributes and flattens by one level.
    fn navigate_entries(
        &self,
        entries: &[&'a ResolvedEntry],
        name: &str,
    ) -> Result<EvalValue<'a>, String> {
        let mut nums = Vec::new();
        let mut strs = Vec::new();
        let mut bools = Vec::new();
        let mut refs = Vec::new();
        for &entry in entries {
            match self.navigate_entry(entry, name)? {
                EvalValue::Null => {}
                EvalValue::Num(n) => nums.push(n),
                EvalValue::NumList(ns) => nums.extend(ns),
                EvalValue::Str(s) => strs.push(s),
                EvalValue::StrList(ss) => strs.extend(ss),
                EvalValue::Bool(b) => bools.push(b),
                EvalValue::BoolList(bs) => bools.extend(bs),
                EvalValue::Entry(e) => refs.push(e),
                EvalValue::Entries(es) => refs.extend(es),
                other => {
                    return Err(format!(
                        "unexpected {} while distributing '.{}'",
                        other.kind(),
                        name
                    ))
                }
            }
        }
        let populated = usize::from(!nums.is_empty())
            + usize::from(!strs.is_empty())
            + usize::from(!bools.is_empty())
            + usize::from(!refs.is_empty());
        if populated > 1 {
            return Err(format!("mixed value kinds from field '{}'", name));
        }
        if !nums.is_empty() {
            Ok(EvalValue::NumList(nums))
        } else if !strs.is_empty() {
            Ok(EvalValue::StrList(strs))
        } else if !bools.is_empty() {
            Ok(EvalValue::BoolList(bools))
        } else if !refs.is_empty() {
            Ok(EvalValue::Entries(refs))
        } else {
            Ok(EvalValue::Null)
        }
    }

    // ------------------------------------------------------------------
    // Methods: time(), where()
    // ------------------------------------------------------------------

    fn apply_time(&self, value: EvalValue<'a>, arg: EvalValue<'a>) -> Result<EvalValue<'a>, String> {
        let base = match arg {
            EvalValue::Str(s) => s,
            other => {
                return Err(format!(
                    "time() expects a quoted base letter, got {}",
                    other.kind()
                ))
            }
        };
        if !TIME_BASES.contains(&base.as_str()) {
            return Err(format!(
                "unknown time base '{}' (expected one of t, m, p, n)",
                base
            ));
        }
        match value {
            EvalValue::Entry(entry) => Ok(EvalValue::Num(self.time_sum(entry, &base)?)),
            EvalValue::Entries(entries) => {
                let sums = entries
                    .iter()
                    .map(|e| self.time_sum(e, &base))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(EvalValue::NumList(sums))
            }
            EvalValue::Collection(entries) => Ok(EvalValue::NumList(
                entries.iter().map(|e| e.time_sum(&base)).collect(),
            )),
            other => Err(format!(
                "time() requires an entry or collection, got {}",
                other.kind()
            )),
        }
    }

    /// Sum of `value_int` over `time_type` children whose subdivision
    /// equals the base or starts with `base + "/"`; 0 when the field or
    /// matches are absent.
    fn time_sum(&self, node: &ResolvedEntry, base: &str) -> Result<f64, String> {
        let catalog = self.catalog.ok_or("time() requires a schema context")?;
        let Some(field) = catalog.field_of_metric_by_name(node.entry.definition, TIME_TYPE_FIELD)
        else {
            return Ok(0.0);
        };
        let sum: i64 = node
            .children_of_field(field.id)
            .filter(|c| c.subdivision_matches(base))
            .filter_map(|c| c.attribute.as_ref())
            .filter_map(|a| a.value.value_int)
            .sum();
        Ok(sum as f64)
    }

    fn apply_where(
        &self,
        value: EvalValue<'a>,
        predicate: &[Token],
    ) -> Result<EvalValue<'a>, String> {
        // MVP predicate form: subdivision in "prefix"
        let prefix = match predicate {
            [Token::Ident(subject), Token::Ident(op), Token::Str(prefix)]
                if subject == "subdivision" && op == "in" =>
            {
                prefix
            }
            _ => {
                return Err(
                    "unsupported where predicate; expected: subdivision in \"prefix\"".to_string(),
                )
            }
        };
        let entries = match value {
            EvalValue::Entry(e) => vec![e],
            EvalValue::Entries(es) => es,
            other => {
                return Err(format!(
                    "where() requires entry references, got {}",
                    other.kind()
                ))
            }
        };
        Ok(EvalValue::Entries(
            entries
                .into_iter()
                .filter(|e| e.subdivision_matches(prefix))
                .collect(),
        ))
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    fn index(&self, value: EvalValue<'a>, index: EvalValue<'a>) -> Result<EvalValue<'a>, String> {
        let idx = match index {
            EvalValue::Num(n) if n >= 0.0 && n.fract() == 0.0 => n as usize,
            other => {
                return Err(format!(
                    "index must be a non-negative integer, got {}",
                    other.kind()
                ))
            }
        };
        match value {
            EvalValue::Str(s) => {
                let tokens: Vec<&str> = if s.is_empty() {
                    Vec::new()
                } else {
                    s.split('/').collect()
                };
                tokens
                    .get(idx)
                    .map(|t| EvalValue::Str((*t).to_string()))
                    .ok_or_else(|| {
                        format!("index {} out of range (length {})", idx, tokens.len())
                    })
            }
            other => Err(format!("cannot index {}", other.kind())),
        }
    }
}

/// Widget-context `alias.field`: numeric coercions of the named attribute
/// across the collection; non-numeric values drop silently.
fn collection_field<'a>(entries: &'a [LoadedEntry], name: &str) -> EvalValue<'a> {
    let nums: Vec<f64> = entries
        .iter()
        .filter_map(|e| e.attributes.get(name))
        .filter_map(ScalarValue::as_number)
        .collect();
    EvalValue::NumList(nums)
}

fn scalar_to_value<'a>(scalar: ScalarValue) -> EvalValue<'a> {
    match scalar {
        ScalarValue::Int(v) => EvalValue::Num(v as f64),
        ScalarValue::Float(v) => EvalValue::Num(v),
        ScalarValue::Str(v) => EvalValue::Str(v),
        ScalarValue::Bool(v) => EvalValue::Bool(v),
        ScalarValue::Timestamp(v) => EvalValue::Num(v.and_utc().timestamp() as f64),
        ScalarValue::Hierarchy(v) => EvalValue::Str(v),
    }
}

/// Collapse a homogeneous value vector: length one becomes the scalar.
fn collapse_values<'a>(values: Vec<EvalValue<'a>>, field: &str) -> Result<EvalValue<'a>, String> {
    if values.len() == 1 {
        return Ok(values.into_iter().next().unwrap_or(EvalValue::Null));
    }
    if values.iter().all(|v| matches!(v, EvalValue::Num(_))) {
        return Ok(EvalValue::NumList(
            values
                .into_iter()
                .filter_map(|v| match v {
                    EvalValue::Num(n) => Some(n),
                    _ => None,
                })
                .collect(),
        ));
    }
    if values.iter().all(|v| matches!(v, EvalValue::Str(_))) {
        return Ok(EvalValue::StrList(
            values
                .into_iter()
                .filter_map(|v| match v {
                    EvalValue::Str(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ));
    }
    if values.iter().all(|v| matches!(v, EvalValue::Bool(_))) {
        return Ok(EvalValue::BoolList(
            values
                .into_iter()
                .filter_map(|v| match v {
                    EvalValue::Bool(b) => Some(b),
                    _ => None,
                })
                .collect(),
        ));
    }
    Err(format!("mixed value kinds from field '{}'", field))
}
