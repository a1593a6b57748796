//! Aperture dictionary and `AD` parameter parsing.

use std::collections::{BTreeMap, HashMap};

use crate::error::CamError;
use crate::gerber::format::parse_decimal;
use crate::gerber::macros::MacroDefinition;
use crate::model::{Aperture, Hole};

/// D-code keyed aperture store.
///
/// Iteration order is ascending D-code, which keeps serialized output
/// deterministic.
#[derive(Debug, Default)]
pub struct ApertureDictionary {
    map: BTreeMap<i32, Aperture>,
}

impl ApertureDictionary {
    /// Creates an empty dictionary.
    pub const fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Inserts an aperture; last write wins.
    ///
    /// Returns a warning detail when the D-code was already defined.
    pub fn define(&mut self, dcode: i32, aperture: Aperture) -> Option<String> {
        let redefined = self.map.insert(dcode, aperture).is_some();
        redefined.then(|| format!("aperture D{dcode} redefined; last definition wins"))
    }

    /// Resolves a D-code.
    pub fn lookup(&self, dcode: i32) -> Option<&Aperture> {
        self.map.get(&dcode)
    }

    /// Number of defined apertures.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no aperture has been defined.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates `(dcode, aperture)` pairs in ascending D-code order.
    pub fn iter(&self) -> impl Iterator<Item = (&i32, &Aperture)> {
        self.map.iter()
    }

    /// Borrows the backing map (for bounding-box lookups).
    pub const fn map(&self) -> &BTreeMap<i32, Aperture> {
        &self.map
    }

    /// Consumes the dictionary into its backing map.
    #[must_use]
    pub fn into_map(self) -> BTreeMap<i32, Aperture> {
        self.map
    }
}

/// Parses the body of an `AD` parameter (everything after `AD`).
///
/// Standard shapes are `C`/`R`/`O`/`P` with `X`-separated decimal modifiers;
/// any other shape token is a macro invocation, expanded immediately against
/// the stored definitions.
///
/// # Errors
///
/// Returns [`CamError::Parse`] for malformed bodies and [`CamError::Macro`]
/// when a macro is unknown or fails to evaluate.
pub fn parse_definition(
    body: &str,
    macros: &HashMap<String, MacroDefinition>,
) -> Result<(i32, Aperture), CamError> {
    let body = body
        .strip_prefix('D')
        .ok_or_else(|| CamError::Parse(format!("aperture definition `{body}` missing D-code")))?;

    let digits_end = body
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(body.len());
    let (digits, rest) = body.split_at(digits_end);
    let dcode: i32 = digits
        .parse()
        .map_err(|_| CamError::Parse(format!("invalid aperture D-code in `D{body}`")))?;

    let (shape, modifiers) = match rest.split_once(',') {
        Some((shape, modifiers)) => (shape, parse_modifiers(modifiers)?),
        None => (rest, Vec::new()),
    };
    if shape.is_empty() {
        return Err(CamError::Parse(format!(
            "aperture D{dcode} has no shape token"
        )));
    }

    let aperture = match shape {
        "C" => circle(dcode, &modifiers)?,
        "R" => rectangular(dcode, &modifiers, false)?,
        "O" => rectangular(dcode, &modifiers, true)?,
        "P" => polygon(dcode, &modifiers)?,
        name => {
            let definition = macros.get(name).ok_or_else(|| {
                CamError::Macro(format!("aperture D{dcode} references unknown macro `{name}`"))
            })?;
            let primitives = definition.evaluate(&modifiers)?;
            Aperture::Macro {
                name: name.to_string(),
                args: modifiers,
                primitives,
            }
        }
    };

    Ok((dcode, aperture))
}

fn parse_modifiers(raw: &str) -> Result<Vec<f64>, CamError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw.split(['X', 'x']).map(parse_decimal).collect()
}

fn hole_from(extra: &[f64]) -> Result<Option<Hole>, CamError> {
    let mut values = extra.iter();
    match (values.next(), values.next(), values.next()) {
        (None, _, _) => Ok(None),
        (Some(&diameter), None, _) => Ok(Some(Hole::Round { diameter })),
        (Some(&width), Some(&height), None) => Ok(Some(Hole::Rect { width, height })),
        _ => Err(CamError::Parse(
            "too many hole modifiers in aperture definition".to_string(),
        )),
    }
}

fn circle(dcode: i32, modifiers: &[f64]) -> Result<Aperture, CamError> {
    let mut values = modifiers.iter();
    let diameter = *values.next().ok_or_else(|| {
        CamError::Parse(format!("circle aperture D{dcode} is missing its diameter"))
    })?;
    Ok(Aperture::Circle {
        diameter,
        hole: hole_from(values.as_slice())?,
    })
}

fn rectangular(dcode: i32, modifiers: &[f64], obround: bool) -> Result<Aperture, CamError> {
    let mut values = modifiers.iter();
    let (Some(&width), Some(&height)) = (values.next(), values.next()) else {
        return Err(CamError::Parse(format!(
            "aperture D{dcode} requires width and height modifiers"
        )));
    };
    let hole = hole_from(values.as_slice())?;
    Ok(if obround {
        Aperture::Obround {
            width,
            height,
            hole,
        }
    } else {
        Aperture::Rectangle {
            width,
            height,
            hole,
        }
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn polygon(dcode: i32, modifiers: &[f64]) -> Result<Aperture, CamError> {
    let mut values = modifiers.iter();
    let (Some(&diameter), Some(&vertices)) = (values.next(), values.next()) else {
        return Err(CamError::Parse(format!(
            "polygon aperture D{dcode} requires diameter and vertex count"
        )));
    };
    if !(3.0..=12.0).contains(&vertices) {
        return Err(CamError::Parse(format!(
            "polygon aperture D{dcode} vertex count {vertices} outside 3..=12"
        )));
    }
    let rotation = values.next().copied().unwrap_or(0.0);
    Ok(Aperture::Polygon {
        diameter,
        vertices: vertices.round() as u32,
        rotation,
        hole: hole_from(values.as_slice())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_macros() -> HashMap<String, MacroDefinition> {
        HashMap::new()
    }

    #[test]
    fn ut_apr_001_circle_with_and_without_hole() {
        let parsed = parse_definition("D10C,0.5", &no_macros());
        assert_eq!(
            parsed.ok(),
            Some((
                10,
                Aperture::Circle {
                    diameter: 0.5,
                    hole: None
                }
            ))
        );

        let parsed = parse_definition("D11C,0.5X0.2", &no_macros());
        assert_eq!(
            parsed.ok(),
            Some((
                11,
                Aperture::Circle {
                    diameter: 0.5,
                    hole: Some(Hole::Round { diameter: 0.2 })
                }
            ))
        );
    }

    #[test]
    fn ut_apr_002_rectangle_and_obround() {
        let parsed = parse_definition("D12R,0.044X0.025", &no_macros());
        assert_eq!(
            parsed.ok(),
            Some((
                12,
                Aperture::Rectangle {
                    width: 0.044,
                    height: 0.025,
                    hole: None
                }
            ))
        );

        let parsed = parse_definition("D13O,0.046X0.026X0.019", &no_macros());
        assert_eq!(
            parsed.ok(),
            Some((
                13,
                Aperture::Obround {
                    width: 0.046,
                    height: 0.026,
                    hole: Some(Hole::Round { diameter: 0.019 })
                }
            ))
        );
    }

    #[test]
    fn ut_apr_003_polygon_with_rotation() {
        let parsed = parse_definition("D17P,0.040X6X15.0", &no_macros());
        assert_eq!(
            parsed.ok(),
            Some((
                17,
                Aperture::Polygon {
                    diameter: 0.040,
                    vertices: 6,
                    rotation: 15.0,
                    hole: None
                }
            ))
        );
    }

    #[test]
    fn ut_apr_004_macro_invocation_expands_primitives() {
        let mut macros = HashMap::new();
        let mut def = MacroDefinition::new("PAD".to_string());
        assert!(def.push_line("1,1,$1,0,0").is_ok());
        macros.insert("PAD".to_string(), def);

        let parsed = parse_definition("D20PAD,0.8", &macros);
        assert!(parsed.is_ok());
        if let Ok((dcode, Aperture::Macro {
            name,
            args,
            primitives,
        })) = parsed
        {
            assert_eq!(dcode, 20);
            assert_eq!(name, "PAD");
            assert_eq!(args, vec![0.8]);
            assert_eq!(primitives.len(), 1);
        }
    }

    #[test]
    fn ut_apr_005_redefinition_warns_and_last_write_wins() {
        let mut dictionary = ApertureDictionary::new();
        assert!(dictionary
            .define(
                10,
                Aperture::Circle {
                    diameter: 0.5,
                    hole: None
                }
            )
            .is_none());
        let warning = dictionary.define(
            10,
            Aperture::Circle {
                diameter: 0.8,
                hole: None,
            },
        );
        assert!(warning.is_some(), "redefinition must warn");
        assert_eq!(
            dictionary.lookup(10),
            Some(&Aperture::Circle {
                diameter: 0.8,
                hole: None
            })
        );
    }

    #[test]
    fn bc_apr_001_unknown_macro_name_is_an_error() {
        assert!(matches!(
            parse_definition("D21NOSUCH,1", &no_macros()),
            Err(CamError::Macro(_))
        ));
    }

    #[test]
    fn bc_apr_002_missing_modifiers_are_errors() {
        assert!(parse_definition("D10C", &no_macros()).is_err());
        assert!(parse_definition("D12R,0.5", &no_macros()).is_err());
        assert!(parse_definition("D17P,0.5X2", &no_macros()).is_err());
    }

    #[test]
    fn bc_apr_003_malformed_dcode_is_an_error() {
        assert!(parse_definition("C,0.5", &no_macros()).is_err());
        assert!(parse_definition("D,0.5", &no_macros()).is_err());
    }
}
