//! Aperture macro definitions (`AM`) and their evaluation.
//!
//! A macro body is a sequence of primitive templates and `$n = expr`
//! variable assignments. Expressions are parsed once into a small AST at
//! definition time and evaluated against call-site arguments when an `AD`
//! parameter instantiates the macro. Evaluation is pure: the same definition
//! and arguments always produce the same primitives.

use std::collections::HashMap;

use crate::error::CamError;
use crate::model::{Exposure, MacroPrimitive, Point};

/// Binary operator in a macro expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `x`
    Mul,
    /// `/`
    Div,
}

/// A macro arithmetic expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Decimal literal.
    Literal(f64),
    /// Parameter or variable reference `$n` (1-based).
    Variable(u32),
    /// Unary negation.
    Neg(Box<Expr>),
    /// Binary operation with conventional precedence.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
}

impl Expr {
    /// Evaluates the expression against the variable context.
    ///
    /// Unset variables read as `0`, matching common interpreter behavior for
    /// macros called with fewer arguments than they reference.
    ///
    /// # Errors
    ///
    /// Returns [`CamError::Macro`] on division by zero.
    pub fn evaluate(&self, vars: &HashMap<u32, f64>) -> Result<f64, CamError> {
        match self {
            Self::Literal(value) => Ok(*value),
            Self::Variable(number) => Ok(vars.get(number).copied().unwrap_or(0.0)),
            Self::Neg(inner) => Ok(-inner.evaluate(vars)?),
            Self::Binary { op, left, right } => {
                let lhs = left.evaluate(vars)?;
                let rhs = right.evaluate(vars)?;
                match op {
                    BinaryOp::Add => Ok(lhs + rhs),
                    BinaryOp::Sub => Ok(lhs - rhs),
                    BinaryOp::Mul => Ok(lhs * rhs),
                    BinaryOp::Div => {
                        if rhs.abs() < f64::EPSILON {
                            return Err(CamError::Macro(
                                "division by zero in macro expression".to_string(),
                            ));
                        }
                        Ok(lhs / rhs)
                    }
                }
            }
        }
    }

    /// Highest `$n` referenced by this expression, or 0.
    pub fn max_variable(&self) -> u32 {
        match self {
            Self::Literal(_) => 0,
            Self::Variable(number) => *number,
            Self::Neg(inner) => inner.max_variable(),
            Self::Binary { left, right, .. } => left.max_variable().max(right.max_variable()),
        }
    }
}

/// One line of a macro body.
#[derive(Debug, Clone, PartialEq)]
enum MacroContent {
    /// `$n = expr` assignment.
    Variable { number: u32, expr: Expr },
    /// Primitive template: code plus unevaluated modifier expressions.
    Template { code: u32, modifiers: Vec<Expr> },
    /// Code-0 comment line (skipped at evaluation).
    Comment,
}

/// A parsed `AM` macro definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroDefinition {
    /// Macro name as given after `AM`.
    pub name: String,
    content: Vec<MacroContent>,
}

impl MacroDefinition {
    /// Creates an empty definition.
    pub const fn new(name: String) -> Self {
        Self {
            name,
            content: Vec::new(),
        }
    }

    /// Parses and appends one body line (everything between `*` terminators).
    ///
    /// # Errors
    ///
    /// Returns [`CamError::Macro`] for malformed assignments, modifiers, or
    /// primitive codes.
    pub fn push_line(&mut self, line: &str) -> Result<(), CamError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        if let Some(assignment) = line.strip_prefix('$') {
            let (number_raw, expr_raw) = assignment.split_once('=').ok_or_else(|| {
                CamError::Macro(format!("malformed variable assignment `{line}`"))
            })?;
            let number: u32 = number_raw.trim().parse().map_err(|_| {
                CamError::Macro(format!("invalid variable number `{number_raw}`"))
            })?;
            let expr = parse_expression(expr_raw)?;
            self.content.push(MacroContent::Variable { number, expr });
            return Ok(());
        }

        // Code-0 comments run to the end of the line with no field structure.
        if line == "0" || line.starts_with("0 ") {
            self.content.push(MacroContent::Comment);
            return Ok(());
        }

        let mut fields = line.split(',');
        let code_raw = fields.next().unwrap_or_default().trim();
        let code: u32 = code_raw
            .parse()
            .map_err(|_| CamError::Macro(format!("invalid primitive code `{code_raw}`")))?;

        let modifiers = fields
            .map(parse_expression)
            .collect::<Result<Vec<_>, _>>()?;
        self.content.push(MacroContent::Template { code, modifiers });
        Ok(())
    }

    /// Parameter arity: the highest `$n` referenced anywhere in the body.
    pub fn arity(&self) -> u32 {
        self.content
            .iter()
            .map(|content| match content {
                MacroContent::Variable { number, expr } => (*number).max(expr.max_variable()),
                MacroContent::Template { modifiers, .. } => modifiers
                    .iter()
                    .map(Expr::max_variable)
                    .max()
                    .unwrap_or(0),
                MacroContent::Comment => 0,
            })
            .max()
            .unwrap_or(0)
    }

    /// Expands the macro against call-site arguments (`args[0]` binds `$1`).
    ///
    /// # Errors
    ///
    /// Returns [`CamError::Macro`] for unknown primitive codes, missing
    /// modifiers, or division by zero.
    pub fn evaluate(&self, args: &[f64]) -> Result<Vec<MacroPrimitive>, CamError> {
        let mut vars: HashMap<u32, f64> = HashMap::new();
        for (index, &value) in args.iter().enumerate() {
            if let Ok(position) = u32::try_from(index) {
                vars.insert(position + 1, value);
            }
        }

        let mut primitives = Vec::new();
        for content in &self.content {
            match content {
                MacroContent::Variable { number, expr } => {
                    let value = expr.evaluate(&vars)?;
                    vars.insert(*number, value);
                }
                MacroContent::Template { code, modifiers } => {
                    let values = modifiers
                        .iter()
                        .map(|expr| expr.evaluate(&vars))
                        .collect::<Result<Vec<_>, _>>()?;
                    primitives.push(build_primitive(&self.name, *code, &values)?);
                }
                MacroContent::Comment => {}
            }
        }
        Ok(primitives)
    }
}

/// Cursor over resolved modifier values.
struct Fields<'a> {
    name: &'a str,
    code: u32,
    values: std::slice::Iter<'a, f64>,
}

impl Fields<'_> {
    fn required(&mut self, label: &str) -> Result<f64, CamError> {
        self.values.next().copied().ok_or_else(|| {
            CamError::Macro(format!(
                "macro `{}` primitive {} is missing the {label} modifier",
                self.name, self.code
            ))
        })
    }

    fn optional(&mut self) -> f64 {
        self.values.next().copied().unwrap_or(0.0)
    }

    fn exposure(&mut self) -> Result<Exposure, CamError> {
        let value = self.required("exposure")?;
        Ok(if value.abs() < f64::EPSILON {
            Exposure::Subtract
        } else {
            Exposure::Add
        })
    }

    fn point(&mut self, label: &str) -> Result<Point, CamError> {
        let x = self.required(label)?;
        let y = self.required(label)?;
        Ok(Point::new(x, y))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn count(&mut self, label: &str) -> Result<u32, CamError> {
        let value = self.required(label)?;
        if value < 0.0 {
            return Err(CamError::Macro(format!(
                "macro `{}` primitive {} has a negative {label}",
                self.name, self.code
            )));
        }
        Ok(value.round() as u32)
    }
}

fn build_primitive(name: &str, code: u32, values: &[f64]) -> Result<MacroPrimitive, CamError> {
    let mut fields = Fields {
        name,
        code,
        values: values.iter(),
    };

    match code {
        1 => Ok(MacroPrimitive::Circle {
            exposure: fields.exposure()?,
            diameter: fields.required("diameter")?,
            center: fields.point("center")?,
            rotation: fields.optional(),
        }),
        2 | 20 => Ok(MacroPrimitive::VectorLine {
            exposure: fields.exposure()?,
            width: fields.required("width")?,
            start: fields.point("start")?,
            end: fields.point("end")?,
            rotation: fields.optional(),
        }),
        21 => Ok(MacroPrimitive::CenterLine {
            exposure: fields.exposure()?,
            width: fields.required("width")?,
            height: fields.required("height")?,
            center: fields.point("center")?,
            rotation: fields.optional(),
        }),
        4 => {
            let exposure = fields.exposure()?;
            let count = fields.count("vertex count")?;
            let mut points = vec![fields.point("start")?];
            for _ in 0..count {
                points.push(fields.point("vertex")?);
            }
            Ok(MacroPrimitive::Outline {
                exposure,
                points,
                rotation: fields.optional(),
            })
        }
        5 => Ok(MacroPrimitive::Polygon {
            exposure: fields.exposure()?,
            vertices: fields.count("vertex count")?,
            center: fields.point("center")?,
            diameter: fields.required("diameter")?,
            rotation: fields.optional(),
        }),
        6 => Ok(MacroPrimitive::Moire {
            center: fields.point("center")?,
            outer_diameter: fields.required("outer diameter")?,
            ring_thickness: fields.required("ring thickness")?,
            ring_gap: fields.required("ring gap")?,
            max_rings: fields.count("ring count")?,
            crosshair_thickness: fields.required("crosshair thickness")?,
            crosshair_length: fields.required("crosshair length")?,
            rotation: fields.optional(),
        }),
        7 => Ok(MacroPrimitive::Thermal {
            center: fields.point("center")?,
            outer_diameter: fields.required("outer diameter")?,
            inner_diameter: fields.required("inner diameter")?,
            gap: fields.required("gap")?,
            rotation: fields.optional(),
        }),
        _ => Err(CamError::Macro(format!(
            "macro `{name}` uses unknown primitive code {code}"
        ))),
    }
}

/// Parses a macro arithmetic expression into an [`Expr`].
///
/// Supports decimal literals, `$n` references, unary minus, parentheses, and
/// the four binary operators with conventional precedence (`x` multiplies).
///
/// # Errors
///
/// Returns [`CamError::Macro`] for empty input or malformed syntax.
pub fn parse_expression(raw: &str) -> Result<Expr, CamError> {
    let tokens = tokenize(raw)?;
    let (expr, rest) = parse_additive(&tokens)?;
    if rest.is_empty() {
        Ok(expr)
    } else {
        Err(CamError::Macro(format!(
            "unexpected trailing tokens in expression `{raw}`"
        )))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Variable(u32),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(raw: &str) -> Result<Vec<Token>, CamError> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' => {}
            '+' | '-' | '/' => tokens.push(Token::Op(c)),
            'x' | 'X' => tokens.push(Token::Op('x')),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '$' => {
                let mut digits = String::new();
                while chars.peek().is_some_and(char::is_ascii_digit) {
                    if let Some(d) = chars.next() {
                        digits.push(d);
                    }
                }
                let number: u32 = digits.parse().map_err(|_| {
                    CamError::Macro(format!("invalid variable reference in `{raw}`"))
                })?;
                tokens.push(Token::Variable(number));
            }
            '0'..='9' | '.' => {
                let mut digits = String::from(c);
                while let Some(&p) = chars.peek() {
                    if p.is_ascii_digit() || p == '.' {
                        chars.next();
                        digits.push(p);
                    } else {
                        break;
                    }
                }
                let value: f64 = digits
                    .parse()
                    .map_err(|_| CamError::Macro(format!("invalid number `{digits}`")))?;
                tokens.push(Token::Number(value));
            }
            _ => {
                return Err(CamError::Macro(format!(
                    "unexpected character `{c}` in expression `{raw}`"
                )));
            }
        }
    }

    if tokens.is_empty() {
        return Err(CamError::Macro("empty macro expression".to_string()));
    }
    Ok(tokens)
}

fn parse_additive(tokens: &[Token]) -> Result<(Expr, &[Token]), CamError> {
    let (mut left, mut rest) = parse_multiplicative(tokens)?;

    while let Some((op, tail)) = match rest.first() {
        Some(Token::Op('+')) => rest.get(1..).map(|t| (BinaryOp::Add, t)),
        Some(Token::Op('-')) => rest.get(1..).map(|t| (BinaryOp::Sub, t)),
        _ => None,
    } {
        let (right, new_rest) = parse_multiplicative(tail)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        rest = new_rest;
    }

    Ok((left, rest))
}

fn parse_multiplicative(tokens: &[Token]) -> Result<(Expr, &[Token]), CamError> {
    let (mut left, mut rest) = parse_unary(tokens)?;

    while let Some((op, tail)) = match rest.first() {
        Some(Token::Op('x')) => rest.get(1..).map(|t| (BinaryOp::Mul, t)),
        Some(Token::Op('/')) => rest.get(1..).map(|t| (BinaryOp::Div, t)),
        _ => None,
    } {
        let (right, new_rest) = parse_unary(tail)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        rest = new_rest;
    }

    Ok((left, rest))
}

fn parse_unary(tokens: &[Token]) -> Result<(Expr, &[Token]), CamError> {
    let tail = tokens.get(1..).unwrap_or_default();
    match tokens.first() {
        Some(Token::Op('+')) => parse_unary(tail),
        Some(Token::Op('-')) => {
            let (inner, rest) = parse_unary(tail)?;
            Ok((Expr::Neg(Box::new(inner)), rest))
        }
        Some(Token::LParen) => {
            let (inner, rest) = parse_additive(tail)?;
            match rest.first() {
                Some(Token::RParen) => Ok((inner, rest.get(1..).unwrap_or_default())),
                _ => Err(CamError::Macro("missing `)` in expression".to_string())),
            }
        }
        Some(Token::Number(value)) => Ok((Expr::Literal(*value), tail)),
        Some(Token::Variable(number)) => Ok((Expr::Variable(*number), tail)),
        _ => Err(CamError::Macro(
            "expected number, variable, or `(`".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn eval_str(raw: &str, args: &[f64]) -> f64 {
        let expr = parse_expression(raw);
        assert!(expr.is_ok(), "`{raw}` should parse: {:?}", expr.err());
        let mut vars = HashMap::new();
        for (i, &v) in args.iter().enumerate() {
            if let Ok(i) = u32::try_from(i) {
                vars.insert(i + 1, v);
            }
        }
        expr.and_then(|e| e.evaluate(&vars)).unwrap_or(f64::NAN)
    }

    fn definition(lines: &[&str]) -> MacroDefinition {
        let mut def = MacroDefinition::new("TEST".to_string());
        for line in lines {
            let pushed = def.push_line(line);
            assert!(pushed.is_ok(), "`{line}` should parse: {:?}", pushed.err());
        }
        def
    }

    #[test]
    fn ut_mac_001_multiplication_binds_tighter_than_addition() {
        assert!((eval_str("2+3x4", &[]) - 14.0).abs() < EPSILON);
        assert!((eval_str("(2+3)x4", &[]) - 20.0).abs() < EPSILON);
    }

    #[test]
    fn ut_mac_002_unary_minus_and_parameters() {
        assert!((eval_str("-$1+1", &[2.5]) - (-1.5)).abs() < EPSILON);
        assert!((eval_str("$2/$1", &[2.0, 5.0]) - 2.5).abs() < EPSILON);
    }

    #[test]
    fn ut_mac_003_unset_variable_reads_zero() {
        assert!(eval_str("$9", &[]).abs() < EPSILON);
    }

    #[test]
    fn ut_mac_004_circle_template_resolves_against_arguments() {
        let def = definition(&["1,1,$1,0,0"]);
        let primitives = def.evaluate(&[0.5]);
        assert!(primitives.is_ok());
        assert_eq!(
            primitives.unwrap_or_default(),
            vec![MacroPrimitive::Circle {
                exposure: Exposure::Add,
                diameter: 0.5,
                center: Point::new(0.0, 0.0),
                rotation: 0.0,
            }]
        );
    }

    #[test]
    fn ut_mac_005_variable_assignment_feeds_later_primitives() {
        let def = definition(&["$3=$1x2+$2", "1,1,$3,0,0"]);
        let primitives = def.evaluate(&[3.0, 1.0]).unwrap_or_default();
        assert_eq!(primitives.len(), 1);
        if let Some(MacroPrimitive::Circle { diameter, .. }) = primitives.first() {
            assert!((diameter - 7.0).abs() < EPSILON);
        }
    }

    #[test]
    fn ut_mac_006_outline_collects_vertex_pairs() {
        let def = definition(&["4,1,3,0,0,1,0,1,1,0,0,0"]);
        let primitives = def.evaluate(&[]).unwrap_or_default();
        assert_eq!(primitives.len(), 1);
        if let Some(MacroPrimitive::Outline { points, .. }) = primitives.first() {
            assert_eq!(points.len(), 4);
            assert_eq!(points.first(), Some(&Point::new(0.0, 0.0)));
            assert_eq!(points.last(), Some(&Point::new(0.0, 0.0)));
        }
    }

    #[test]
    fn ut_mac_007_exposure_zero_means_subtract() {
        let def = definition(&["1,0,1.0,0,0"]);
        let primitives = def.evaluate(&[]).unwrap_or_default();
        assert!(matches!(
            primitives.first(),
            Some(MacroPrimitive::Circle {
                exposure: Exposure::Subtract,
                ..
            })
        ));
    }

    #[test]
    fn ut_mac_008_thermal_and_moire_resolve() {
        let def = definition(&[
            "6,0,0,5,0.5,0.5,2,0.1,6,0",
            "7,0,0,0.95,0.75,0.175,22.5",
        ]);
        let primitives = def.evaluate(&[]).unwrap_or_default();
        assert_eq!(primitives.len(), 2);
        assert!(matches!(
            primitives.first(),
            Some(MacroPrimitive::Moire { max_rings: 2, .. })
        ));
        assert!(matches!(
            primitives.get(1),
            Some(MacroPrimitive::Thermal { .. })
        ));
    }

    #[test]
    fn ut_mac_009_arity_tracks_highest_reference() {
        let def = definition(&["$4=$2+1", "1,1,$1,0,0"]);
        assert_eq!(def.arity(), 4);
    }

    #[test]
    fn ut_mac_010_comment_lines_are_skipped() {
        let def = definition(&["0 this is a comment", "1,1,1.0,0,0"]);
        assert_eq!(def.evaluate(&[]).unwrap_or_default().len(), 1);
    }

    #[test]
    fn bc_mac_001_unknown_primitive_code_fails_evaluation() {
        let def = definition(&["93,1,2,3"]);
        assert!(matches!(def.evaluate(&[]), Err(CamError::Macro(_))));
    }

    #[test]
    fn bc_mac_002_division_by_zero_fails_evaluation() {
        let def = definition(&["$2=1/$1", "1,1,$2,0,0"]);
        assert!(matches!(def.evaluate(&[0.0]), Err(CamError::Macro(_))));
    }

    #[test]
    fn bc_mac_003_missing_modifier_fails_evaluation() {
        let def = definition(&["1,1"]);
        assert!(matches!(def.evaluate(&[]), Err(CamError::Macro(_))));
    }

    #[test]
    fn bc_mac_004_malformed_assignment_fails_at_parse() {
        let mut def = MacroDefinition::new("BAD".to_string());
        assert!(def.push_line("$x=1").is_err());
        assert!(def.push_line("$1 2").is_err());
    }
}
