//! Filter expression grammar.
//!
//! ```text
//! expression := token ( "[and]" token )*
//! token      := field                      include the field, unfiltered
//!             | field op value ( sep value )*
//! op         := [eq] | [lt] | [lte] | [gt] | [gte] | [in]
//! sep        := [or]                       alternatives, with [eq] or [in]
//!             | [to]                       inclusive range bounds, with [in]
//! ```
//!
//! Parsing is pure. Several predicates on the same field all apply.

use indexmap::IndexMap;
use std::fmt;

use crate::error::FilterSyntaxError;

const AND: &str = "[and]";
const OR: &str = "or";
const TO: &str = "to";

/// A literal operand. The text is kept verbatim so text columns compare
/// against exactly what the caller wrote; `number` is set when the text
/// reads as a finite float.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub text: String,
    pub number: Option<f64>,
}

impl Operand {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            number: text.parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.number.is_some()
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparison {
    pub fn sql(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
        }
    }

    fn marker(&self) -> &'static str {
        match self {
            Comparison::Lt => "lt",
            Comparison::Lte => "lte",
            Comparison::Gt => "gt",
            Comparison::Gte => "gte",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Operand),
    /// Always carries a numeric operand.
    Compare(Comparison, Operand),
    /// Set membership; never empty.
    In(Vec<Operand>),
    /// Inclusive numeric range.
    Range(Operand, Operand),
}

impl Predicate {
    /// Operator name as it appears in error messages.
    pub fn operator(&self) -> &'static str {
        match self {
            Predicate::Eq(_) => "eq",
            Predicate::Compare(c, _) => c.marker(),
            Predicate::In(_) => "in",
            Predicate::Range(..) => "range",
        }
    }

    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Predicate::Eq(o) | Predicate::Compare(_, o) => vec![o],
            Predicate::In(values) => values.iter().collect(),
            Predicate::Range(low, high) => vec![low, high],
        }
    }

    /// Whether the predicate only makes sense against a numeric column.
    pub fn requires_numeric(&self) -> bool {
        matches!(self, Predicate::Compare(..) | Predicate::Range(..))
    }

    fn write_token(&self, field: &str, out: &mut String) {
        out.push_str(field);
        match self {
            Predicate::Eq(o) => out.push_str(&format!("[eq]{}", o)),
            Predicate::Compare(c, o) => out.push_str(&format!("[{}]{}", c.marker(), o)),
            Predicate::In(values) => {
                out.push_str("[in]");
                let joined: Vec<&str> = values.iter().map(|o| o.text.as_str()).collect();
                out.push_str(&joined.join("[or]"));
            }
            Predicate::Range(low, high) => out.push_str(&format!("[in]{}[to]{}", low, high)),
        }
    }
}

/// A parsed filter expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Every referenced field, in order of first appearance.
    fields: Vec<String>,
    include: Vec<String>,
    predicates: IndexMap<String, Vec<Predicate>>,
}

impl Filter {
    /// Parse an expression. The empty expression is the empty filter.
    pub fn parse(expression: &str) -> Result<Self, FilterSyntaxError> {
        let mut filter = Filter::default();
        if expression.is_empty() {
            return Ok(filter);
        }
        for token in expression.split(AND) {
            match parse_token(token)? {
                (field, None) => filter.add_include(field),
                (field, Some(predicate)) => filter.add_predicate(field, predicate),
            }
        }
        Ok(filter)
    }

    /// Included fields stay in order of first appearance among all fields.
    pub fn add_include(&mut self, field: &str) {
        self.touch(field);
        if !self.include.iter().any(|f| f == field) {
            self.include.push(field.to_string());
            let fields = &self.fields;
            self.include
                .sort_by_key(|f| fields.iter().position(|x| x == f).unwrap_or(usize::MAX));
        }
    }

    pub fn add_predicate(&mut self, field: &str, predicate: Predicate) {
        self.touch(field);
        self.predicates.entry(field.to_string()).or_default().push(predicate);
    }

    fn touch(&mut self, field: &str) {
        if !self.fields.iter().any(|f| f == field) {
            self.fields.push(field.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All referenced fields, included or filtered, in request order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Fields named without an operator.
    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub fn predicates(&self) -> &IndexMap<String, Vec<Predicate>> {
        &self.predicates
    }

    /// Serialize back into the grammar. Parsing the result yields an equal
    /// filter.
    pub fn to_expression(&self) -> String {
        let mut tokens = Vec::new();
        for field in &self.fields {
            if self.include.contains(field) {
                tokens.push(field.clone());
            }
            for predicate in self.predicates.get(field).into_iter().flatten() {
                let mut token = String::new();
                predicate.write_token(field, &mut token);
                tokens.push(token);
            }
        }
        tokens.join(AND)
    }
}

enum Segment<'a> {
    Text(&'a str),
    Marker(&'a str),
}

/// Split a token into literal text and `[marker]` segments.
fn segments(token: &str) -> Result<Vec<Segment<'_>>, FilterSyntaxError> {
    let mut out = Vec::new();
    let mut rest = token;
    while let Some(open) = rest.find('[') {
        let text = &rest[..open];
        if text.contains(']') {
            return Err(FilterSyntaxError::new(token, "unmatched ']'"));
        }
        out.push(Segment::Text(text));
        let after = &rest[open + 1..];
        let close = after
            .find(']')
            .ok_or_else(|| FilterSyntaxError::new(token, "unterminated '['"))?;
        let name = &after[..close];
        if name.contains('[') {
            return Err(FilterSyntaxError::new(token, "nested '['"));
        }
        out.push(Segment::Marker(name));
        rest = &after[close + 1..];
    }
    if rest.contains(']') {
        return Err(FilterSyntaxError::new(token, "unmatched ']'"));
    }
    out.push(Segment::Text(rest));
    Ok(out)
}

fn parse_token(token: &str) -> Result<(&str, Option<Predicate>), FilterSyntaxError> {
    let segs = segments(token)?;

    let field = match segs.first() {
        Some(Segment::Text(f)) => *f,
        _ => "",
    };
    if field.is_empty() {
        return Err(FilterSyntaxError::new(token, "missing field name"));
    }
    if segs.len() == 1 {
        return Ok((field, None));
    }

    let op = match &segs[1] {
        Segment::Marker(m) => *m,
        Segment::Text(_) => return Err(FilterSyntaxError::new(token, "missing operator")),
    };

    // Values alternate with separators: v (sep v)*
    let mut values = Vec::new();
    let mut separator: Option<&str> = None;
    for (i, seg) in segs[2..].iter().enumerate() {
        match seg {
            Segment::Text(v) if i % 2 == 0 => {
                if v.is_empty() {
                    return Err(FilterSyntaxError::new(token, "empty operand"));
                }
                values.push(Operand::new(v));
            }
            Segment::Marker(m) if i % 2 == 1 => {
                if *m != OR && *m != TO {
                    return Err(FilterSyntaxError::new(
                        token,
                        format!("unexpected '[{}]' in operand", m),
                    ));
                }
                if separator.is_some_and(|s| s != *m) {
                    return Err(FilterSyntaxError::new(token, "cannot mix [or] and [to]"));
                }
                separator = Some(*m);
            }
            _ => return Err(FilterSyntaxError::new(token, "malformed operand")),
        }
    }
    if values.is_empty() {
        return Err(FilterSyntaxError::new(token, "empty operand"));
    }

    let comparison = match op {
        "lt" => Some(Comparison::Lt),
        "lte" => Some(Comparison::Lte),
        "gt" => Some(Comparison::Gt),
        "gte" => Some(Comparison::Gte),
        "eq" | "in" => None,
        other => {
            return Err(FilterSyntaxError::new(
                token,
                format!("unknown operator '[{}]'", other),
            ))
        }
    };

    let predicate = match (comparison, op, separator) {
        (Some(c), _, None) => {
            let operand = values.remove(0);
            if !operand.is_numeric() {
                return Err(FilterSyntaxError::new(
                    token,
                    format!("[{}] requires a numeric operand", op),
                ));
            }
            Predicate::Compare(c, operand)
        }
        (Some(_), _, Some(sep)) => {
            return Err(FilterSyntaxError::new(
                token,
                format!("[{}] cannot be used with [{}]", sep, op),
            ))
        }
        (None, "eq", None) => Predicate::Eq(values.remove(0)),
        (None, "eq", Some(TO)) => {
            return Err(FilterSyntaxError::new(token, "[to] is only valid with [in]"))
        }
        (None, _, Some(TO)) => {
            if values.len() != 2 {
                return Err(FilterSyntaxError::new(token, "a range needs exactly two bounds"));
            }
            if !values.iter().all(Operand::is_numeric) {
                return Err(FilterSyntaxError::new(token, "range bounds must be numeric"));
            }
            let high = values.remove(1);
            let low = values.remove(0);
            Predicate::Range(low, high)
        }
        (None, _, _) => Predicate::In(values),
    };

    Ok((field, Some(predicate)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comparison_and_equality() {
        let filter = Filter::parse("ko[eq]K02956[and]e_value[lt]0.001").unwrap();
        assert_eq!(filter.fields(), &["ko", "e_value"]);
        assert!(filter.include().is_empty());
        assert_eq!(filter.predicates()["ko"], vec![Predicate::Eq(Operand::new("K02956"))]);
        match &filter.predicates()["e_value"][0] {
            Predicate::Compare(Comparison::Lt, o) => assert_eq!(o.number, Some(0.001)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_membership_and_range() {
        let filter = Filter::parse("ko[eq]K1[or]K2[and]genome_id[in]a[and]score[in]10[to]20").unwrap();
        assert_eq!(
            filter.predicates()["ko"],
            vec![Predicate::In(vec![Operand::new("K1"), Operand::new("K2")])]
        );
        assert_eq!(filter.predicates()["genome_id"], vec![Predicate::In(vec![Operand::new("a")])]);
        assert_eq!(
            filter.predicates()["score"],
            vec![Predicate::Range(Operand::new("10"), Operand::new("20"))]
        );
    }

    #[test]
    fn test_include_fields_and_repeats() {
        let filter = Filter::parse("gtdb_phylum[and]score[gt]5[and]score[lte]50[and]gtdb_phylum").unwrap();
        assert_eq!(filter.include(), &["gtdb_phylum"]);
        assert_eq!(filter.fields(), &["gtdb_phylum", "score"]);
        assert_eq!(filter.predicates()["score"].len(), 2);
    }

    #[test]
    fn test_operand_keeps_literal() {
        let filter = Filter::parse("partial[eq]00").unwrap();
        match &filter.predicates()["partial"][0] {
            Predicate::Eq(o) => {
                assert_eq!(o.text, "00");
                assert_eq!(o.number, Some(0.0));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!Operand::new("inf").is_numeric());
    }

    #[test]
    fn test_syntax_errors() {
        let cases = [
            ("ko[xx]K1", "ko[xx]K1"),
            ("ko[eq]", "ko[eq]"),
            ("[eq]K1", "[eq]K1"),
            ("e_value[lt]abc", "e_value[lt]abc"),
            ("score[in]1[to]2[to]3", "score[in]1[to]2[to]3"),
            ("score[in]a[to]b", "score[in]a[to]b"),
            ("ko[eq]a[to]b", "ko[eq]a[to]b"),
            ("ko[eq]a[or]b[to]c", "ko[eq]a[or]b[to]c"),
            ("ko[eq]a[or]", "ko[eq]a[or]"),
            ("score[gt]1[or]2", "score[gt]1[or]2"),
            ("ko[eq", "ko[eq"),
            ("ko]", "ko]"),
            ("ko[eq]K1[and][and]x", ""),
        ];
        for (expression, fragment) in cases {
            let err = Filter::parse(expression).unwrap_err();
            assert_eq!(err.fragment, fragment, "expression {}", expression);
        }
    }

    #[test]
    fn test_include_after_predicate_keeps_field_order() {
        let filter = Filter::parse("a[eq]1[and]b[and]a").unwrap();
        assert_eq!(filter.include(), &["a", "b"]);
        assert_eq!(Filter::parse(&filter.to_expression()).unwrap(), filter);
    }

    #[test]
    fn test_round_trip() {
        let expressions = [
            "ko[eq]K02956[and]e_value[lt]0.001",
            "gene_id[and]genome_id[eq]GCA_000010565.1",
            "ko[eq]K1[or]K2[or]K3[and]threshold[gte]12.5",
            "score[in]1e-5[to]3[and]score[gt]0[and]ko",
            "a[eq]1[and]b[eq]2[and]a[lt]3[and]b",
            "partial[in]00[or]01",
        ];
        for expression in expressions {
            let parsed = Filter::parse(expression).unwrap();
            let reparsed = Filter::parse(&parsed.to_expression()).unwrap();
            assert_eq!(parsed, reparsed, "expression {}", expression);
        }
        assert_eq!(Filter::parse("").unwrap(), Filter::default());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn field() -> impl Strategy<Value = String> {
            "[a-z][a-z_]{0,10}"
        }

        fn text() -> impl Strategy<Value = String> {
            "[A-Za-z0-9_.:-]{1,12}"
        }

        fn number() -> impl Strategy<Value = String> {
            prop_oneof![
                any::<i32>().prop_map(|n| n.to_string()),
                (-1.0e6f64..1.0e6).prop_map(|n| n.to_string()),
                (1u32..9, 1u32..30).prop_map(|(m, e)| format!("{}e-{}", m, e)),
            ]
        }

        fn token() -> impl Strategy<Value = String> {
            let comparison = prop_oneof![Just("lt"), Just("lte"), Just("gt"), Just("gte")];
            let set_op = prop_oneof![Just("eq"), Just("in")];
            prop_oneof![
                field(),
                (field(), text()).prop_map(|(f, v)| format!("{}[eq]{}", f, v)),
                (field(), comparison, number()).prop_map(|(f, op, v)| format!("{}[{}]{}", f, op, v)),
                (field(), set_op, prop::collection::vec(text(), 1..5))
                    .prop_map(|(f, op, vs)| format!("{}[{}]{}", f, op, vs.join("[or]"))),
                (field(), number(), number()).prop_map(|(f, lo, hi)| format!("{}[in]{}[to]{}", f, lo, hi)),
            ]
        }

        fn expression() -> impl Strategy<Value = (Vec<String>, String)> {
            prop::collection::vec(token(), 0..7).prop_map(|tokens| {
                let expression = tokens.join("[and]");
                (tokens, expression)
            })
        }

        proptest! {
            #[test]
            fn test_valid_expressions_round_trip((_, expression) in expression()) {
                let parsed = Filter::parse(&expression).unwrap();
                let serialized = parsed.to_expression();
                prop_assert_eq!(Filter::parse(&serialized).unwrap(), parsed.clone());
                prop_assert_eq!(parsed.to_expression(), serialized);
            }

            #[test]
            fn test_every_token_field_is_referenced((tokens, expression) in expression()) {
                let parsed = Filter::parse(&expression).unwrap();
                let mut expected: Vec<String> = Vec::new();
                for token in &tokens {
                    let field = token.split('[').next().unwrap().to_string();
                    if !expected.contains(&field) {
                        expected.push(field);
                    }
                }
                prop_assert_eq!(parsed.fields(), expected.as_slice());
                for field in parsed.fields() {
                    prop_assert!(parsed.include().contains(field) || parsed.predicates().contains_key(field));
                }
            }

            #[test]
            fn test_unknown_operator_is_rejected(f in field(), op in "[a-z]{1,5}", v in text()) {
                prop_assume!(!["eq", "lt", "lte", "gt", "gte", "in", "and"].contains(&op.as_str()));
                let token = format!("{}[{}]{}", f, op, v);
                let err = Filter::parse(&token).unwrap_err();
                prop_assert_eq!(err.fragment, token);
            }
        }
    }
}
