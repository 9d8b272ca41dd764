//! Operator rewriting with tracked graphics state

use std::collections::HashMap;

use log::{trace, warn};

use crate::error::PdfResult;
use crate::pdf::{Dictionary, Object};
use super::operator::ContentOperator;

/// Colour space family, as far as colour operators are concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorSpace {
    DeviceGray,
    DeviceRGB,
    DeviceCMYK,
    Pattern,
    /// Indexed, Separation, DeviceN, Lab and other spaces left untouched
    Other(String),
}

impl ColorSpace {
    /// Number of colour components, when known
    pub fn components(&self) -> Option<usize> {
        match self {
            ColorSpace::DeviceGray => Some(1),
            ColorSpace::DeviceRGB => Some(3),
            ColorSpace::DeviceCMYK => Some(4),
            _ => None,
        }
    }

    /// Device family for a component count, as used by ICCBased streams
    pub fn from_components(n: i64) -> Self {
        match n {
            1 => ColorSpace::DeviceGray,
            3 => ColorSpace::DeviceRGB,
            4 => ColorSpace::DeviceCMYK,
            _ => ColorSpace::Other(format!("ICCBased N={}", n)),
        }
    }

    /// Built-in space named directly in a `cs`/`CS` operand
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "DeviceGray" | "G" | "CalGray" => Some(ColorSpace::DeviceGray),
            "DeviceRGB" | "RGB" | "CalRGB" => Some(ColorSpace::DeviceRGB),
            "DeviceCMYK" | "CMYK" => Some(ColorSpace::DeviceCMYK),
            "Pattern" => Some(ColorSpace::Pattern),
            _ => None,
        }
    }
}

/// Graphics state visible to a visitor
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsState {
    /// Number of unmatched `q` operators
    pub depth: usize,
    pub stroke_space: ColorSpace,
    pub fill_space: ColorSpace,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            depth: 0,
            stroke_space: ColorSpace::DeviceGray,
            fill_space: ColorSpace::DeviceGray,
        }
    }
}

/// Per-operator rewriting strategy
///
/// Receives each operator together with the graphics state in effect before
/// it and returns the operators to emit in its place.
pub trait OperatorVisitor {
    fn visit(&mut self, op: ContentOperator, state: &GraphicsState) -> PdfResult<Vec<ContentOperator>>;
}

impl<F> OperatorVisitor for F
where
    F: FnMut(ContentOperator, &GraphicsState) -> PdfResult<Vec<ContentOperator>>,
{
    fn visit(&mut self, op: ContentOperator, state: &GraphicsState) -> PdfResult<Vec<ContentOperator>> {
        self(op, state)
    }
}

/// Rewrites operator sequences and tracks `q`/`Q` and colour spaces
#[derive(Debug, Clone, Default)]
pub struct ContentTransformer {
    color_spaces: HashMap<String, ColorSpace>,
}

impl ContentTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Named colour spaces from a `/ColorSpace` resource dictionary
    pub fn with_color_spaces(mut self, color_spaces: HashMap<String, ColorSpace>) -> Self {
        self.color_spaces = color_spaces;
        self
    }

    fn lookup(&self, operand: Option<&Object>) -> ColorSpace {
        let name = match operand.and_then(|o| o.as_name_str().ok()) {
            Some(name) => name,
            None => return ColorSpace::Other(String::new()),
        };
        ColorSpace::from_name(name)
            .or_else(|| self.color_spaces.get(name).cloned())
            .unwrap_or_else(|| ColorSpace::Other(name.to_string()))
    }

    /// Apply the effect of `op` to `state`
    fn update(&self, op: &ContentOperator, state: &mut GraphicsState, stack: &mut Vec<GraphicsState>) {
        match op.operator.as_str() {
            "q" => {
                stack.push(state.clone());
                state.depth += 1;
            }
            "Q" => match stack.pop() {
                Some(saved) => *state = saved,
                None => warn!("Unbalanced Q in content stream"),
            },
            "CS" => state.stroke_space = self.lookup(op.operands.first()),
            "cs" => state.fill_space = self.lookup(op.operands.first()),
            "G" => state.stroke_space = ColorSpace::DeviceGray,
            "g" => state.fill_space = ColorSpace::DeviceGray,
            "RG" => state.stroke_space = ColorSpace::DeviceRGB,
            "rg" => state.fill_space = ColorSpace::DeviceRGB,
            "K" => state.stroke_space = ColorSpace::DeviceCMYK,
            "k" => state.fill_space = ColorSpace::DeviceCMYK,
            _ => {}
        }
    }

    /// Run `visitor` over `operators` and serialize what it emits
    pub fn rewrite<I, V>(&self, operators: I, visitor: &mut V) -> PdfResult<Vec<u8>>
    where
        I: IntoIterator<Item = PdfResult<ContentOperator>>,
        V: OperatorVisitor + ?Sized,
    {
        let mut state = GraphicsState::default();
        let mut stack = Vec::new();
        let mut out = Vec::new();
        let mut count = 0usize;

        for op in operators {
            let op = op?;
            let original = op.clone();
            for emitted in visitor.visit(op, &state)? {
                emitted.encode(&mut out)?;
            }
            self.update(&original, &mut state, &mut stack);
            count += 1;
        }

        if !stack.is_empty() {
            trace!("Content stream ends with {} unclosed q", stack.len());
        }
        trace!("Rewrote {} operators", count);
        Ok(out)
    }
}

/// Rewrite with no named colour spaces
pub fn rewrite<I, V>(operators: I, visitor: &mut V) -> PdfResult<Vec<u8>>
where
    I: IntoIterator<Item = PdfResult<ContentOperator>>,
    V: OperatorVisitor + ?Sized,
{
    ContentTransformer::new().rewrite(operators, visitor)
}

/// Map the entries of a `/ColorSpace` resource dictionary
///
/// `resolve` follows an indirect reference one level.
pub fn color_space_map<'a, R>(color_spaces: &'a Dictionary, resolve: R) -> HashMap<String, ColorSpace>
where
    R: Fn(&'a Object) -> Option<&'a Object>,
{
    let mut map = HashMap::new();
    for (key, value) in color_spaces {
        let name = String::from_utf8_lossy(key).into_owned();
        let space = match resolve(value) {
            Some(object) => classify_color_space(object, &resolve),
            None => ColorSpace::Other(name.clone()),
        };
        map.insert(name, space);
    }
    map
}

/// Family of a colour space object: a name or an array like `[/ICCBased 5 0 R]`
pub fn classify_color_space<'a, R>(object: &'a Object, resolve: &R) -> ColorSpace
where
    R: Fn(&'a Object) -> Option<&'a Object>,
{
    match object {
        Object::Name(_) => {
            let name = object.as_name_str().unwrap_or_default();
            ColorSpace::from_name(name).unwrap_or_else(|| ColorSpace::Other(name.to_string()))
        }
        Object::Array(items) => {
            let family = items.first().and_then(|f| f.as_name_str().ok()).unwrap_or_default();
            match family {
                "ICCBased" => items
                    .get(1)
                    .and_then(resolve)
                    .and_then(|stream| stream.as_dict().ok())
                    .and_then(|dict| dict.get_integer("N"))
                    .map(ColorSpace::from_components)
                    .unwrap_or_else(|| ColorSpace::Other(family.to_string())),
                "CalRGB" => ColorSpace::DeviceRGB,
                "CalGray" => ColorSpace::DeviceGray,
                "Pattern" => ColorSpace::Pattern,
                other => ColorSpace::Other(other.to_string()),
            }
        }
        _ => ColorSpace::Other(object.type_name().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::operator::parse_operators;
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test]
    fn test_visitor_sees_state_before_operator() -> PdfResult<()> {
        let mut seen = Vec::new();
        let mut visitor = |op: ContentOperator, state: &GraphicsState| -> PdfResult<Vec<ContentOperator>> {
            seen.push((op.operator.clone(), state.depth, state.fill_space.clone()));
            Ok(vec![op])
        };

        let data = b"q 1 0 0 rg q 0 g Q f Q f";
        let out = rewrite(parse_operators(data), &mut visitor)?;

        assert_eq!(
            seen,
            vec![
                ("q".to_string(), 0, ColorSpace::DeviceGray),
                ("rg".to_string(), 1, ColorSpace::DeviceGray),
                ("q".to_string(), 1, ColorSpace::DeviceRGB),
                ("g".to_string(), 2, ColorSpace::DeviceRGB),
                ("Q".to_string(), 2, ColorSpace::DeviceGray),
                ("f".to_string(), 1, ColorSpace::DeviceRGB),
                ("Q".to_string(), 1, ColorSpace::DeviceRGB),
                ("f".to_string(), 0, ColorSpace::DeviceGray),
            ]
        );
        assert_eq!(out, b"q\n1 0 0 rg\nq\n0 g\nQ\nf\nQ\nf\n");
        Ok(())
    }

    #[test]
    fn test_visitor_can_drop_and_expand() -> PdfResult<()> {
        let mut visitor = |op: ContentOperator, _: &GraphicsState| -> PdfResult<Vec<ContentOperator>> {
            Ok(match op.operator.as_str() {
                "re" => Vec::new(),
                "f" => vec![ContentOperator::new("n", vec![]), op],
                _ => vec![op],
            })
        };
        let out = rewrite(parse_operators(b"0 0 1 1 re f"), &mut visitor)?;
        assert_eq!(out, b"n\nf\n");
        Ok(())
    }

    #[test]
    fn test_unbalanced_restore_is_tolerated() -> PdfResult<()> {
        let mut identity = |op: ContentOperator, _: &GraphicsState| -> PdfResult<Vec<ContentOperator>> { Ok(vec![op]) };
        let out = rewrite(parse_operators(b"Q Q 0 g"), &mut identity)?;
        assert_eq!(out, b"Q\nQ\n0 g\n");
        Ok(())
    }

    #[test]
    fn test_named_color_spaces() {
        let icc = Object::Dictionary(crate::dictionary! { "N" => 4 });
        let resources = crate::dictionary! {
            "CS0" => vec![Object::name("ICCBased"), Object::Integer(0)],
            "CS1" => "DeviceRGB",
            "CS2" => vec![Object::name("Indexed"), Object::name("DeviceRGB")],
        };
        // The ICC stream is stood in for by a dictionary returned for any integer
        let map = color_space_map(&resources, |object| match object {
            Object::Integer(_) => Some(&icc),
            other => Some(other),
        });

        assert_eq!(map.get("CS0"), Some(&ColorSpace::DeviceCMYK));
        assert_eq!(map.get("CS1"), Some(&ColorSpace::DeviceRGB));
        assert_eq!(map.get("CS2"), Some(&ColorSpace::Other("Indexed".to_string())));
    }
}
