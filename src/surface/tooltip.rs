//! Price tooltip model and parsing.
//!
//! The surface hands back the hovered item's tooltip as a tree of text
//! nodes. The asking price lives at a fixed position:
//!
//! ```text
//! root
//! └─ [0] frame
//!    ├─ [0] head
//!    └─ [1] body
//!       └─ [last] price section (>= 2 children)
//!          └─ [1] price body
//!             ├─ [0] "x12"            amount
//!             └─ [2] "Greater ..."    artifact tier
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::types::{ArtifactCost, ArtifactKind};

/// One element of a tooltip tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TooltipNode {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<TooltipNode>,
}

impl TooltipNode {
    pub fn leaf(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            children: Vec::new(),
        }
    }

    pub fn branch(children: Vec<TooltipNode>) -> Self {
        Self {
            text: None,
            children,
        }
    }

    pub fn child(&self, index: usize) -> Option<&TooltipNode> {
        self.children.get(index)
    }

    /// Follow a path of child indices.
    pub fn child_at(&self, path: &[usize]) -> Option<&TooltipNode> {
        path.iter().try_fold(self, |node, &i| node.child(i))
    }

    /// Indented dump of the tree, attached to fatal read errors.
    pub fn visualize(&self) -> String {
        let mut out = String::new();
        self.visualize_into(&mut out, 0, 0);
        out
    }

    fn visualize_into(&self, out: &mut String, index: usize, depth: usize) {
        let _ = writeln!(
            out,
            "{:indent$}[{index}] {} ({} children)",
            "",
            self.text.as_deref().unwrap_or("-"),
            self.children.len(),
            indent = depth * 2
        );
        for (i, child) in self.children.iter().enumerate() {
            child.visualize_into(out, i, depth + 1);
        }
    }
}

/// Build a tooltip shaped like the game's haggle tooltip.
pub fn price_tooltip(item_name: &str, amount_text: &str, currency_text: &str) -> TooltipNode {
    let head = TooltipNode::leaf(item_name);
    let price_body = TooltipNode::branch(vec![
        TooltipNode::leaf(amount_text),
        TooltipNode::leaf("x"),
        TooltipNode::leaf(currency_text),
    ]);
    let price_section = TooltipNode::branch(vec![TooltipNode::leaf("Cost:"), price_body]);
    let body = TooltipNode::branch(vec![TooltipNode::leaf(item_name), price_section]);
    TooltipNode::branch(vec![TooltipNode::branch(vec![head, body])])
}

/// Outcome of reading the asking price from a tooltip.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    Ok(ArtifactCost),
    /// Structure not (yet) present; retry after another hover.
    NotReady,
    /// Structure present but its content cannot be interpreted.
    Malformed(String),
}

/// Read the asking price out of a tooltip tree.
pub fn parse_price(tooltip: Option<&TooltipNode>) -> ParseResult {
    let Some(root) = tooltip else {
        return ParseResult::NotReady;
    };
    let (Some(_head), Some(body)) = (root.child_at(&[0, 0]), root.child_at(&[0, 1])) else {
        return ParseResult::NotReady;
    };
    let Some(section) = body.children.last() else {
        return ParseResult::NotReady;
    };
    if section.children.len() < 2 {
        return ParseResult::NotReady;
    }
    let price_body = &section.children[1];

    let amount_text = price_body
        .child(0)
        .and_then(|n| n.text.as_deref())
        .unwrap_or_default();
    let digits: String = amount_text.chars().filter(|c| c.is_ascii_digit()).collect();
    let amount = match digits.parse::<u32>() {
        Ok(amount) => amount,
        Err(_) => return ParseResult::Malformed(format!("price amount '{amount_text}'")),
    };

    let Some(currency_text) = price_body.child(2).and_then(|n| n.text.as_deref()) else {
        return ParseResult::Malformed("price currency missing".to_string());
    };
    match currency_text.parse::<ArtifactKind>() {
        Ok(kind) => ParseResult::Ok(ArtifactCost::new(kind, amount)),
        Err(e) => ParseResult::Malformed(e.to_string()),
    }
}
