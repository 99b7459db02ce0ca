//! Finding UI controls on the page
//!
//! Google Earth renders most of its chrome inside nested shadow roots, so
//! the search strategies walk every shadow tree instead of relying on
//! `document.querySelector` alone.

use super::PageDriver;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// How a UI control is located.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum UiLocator {
    /// Hardcoded viewport position
    FixedCoordinate { x: f64, y: f64 },
    /// First visible element whose text, aria-label or title contains `pattern`
    TextSearch { pattern: String },
    /// First visible element matching a CSS selector
    SelectorSearch { selector: String },
}

const DEEP_SEARCH_PRELUDE: &str = r#"
    const roots = [document];
    const all = [];
    while (roots.length) {
        const root = roots.shift();
        for (const el of root.querySelectorAll('*')) {
            all.push(el);
            if (el.shadowRoot) roots.push(el.shadowRoot);
        }
    }
    const center = (el) => {
        const r = el.getBoundingClientRect();
        if (r.width === 0 || r.height === 0) return null;
        return { x: r.x + r.width / 2, y: r.y + r.height / 2 };
    };
"#;

impl UiLocator {
    /// True when the locator actually inspects the page.
    pub fn searches_page(&self) -> bool {
        !matches!(self, UiLocator::FixedCoordinate { .. })
    }

    /// Script returning `{x, y}` of the element's center, or `null`.
    pub fn search_script(&self) -> Option<String> {
        match self {
            UiLocator::FixedCoordinate { .. } => None,
            UiLocator::TextSearch { pattern } => {
                let needle = serde_json::to_string(&pattern.to_lowercase()).ok()?;
                Some(format!(
                    r#"(() => {{
    {prelude}
    const needle = {needle};
    for (const el of all) {{
        const label = [el.getAttribute('aria-label'), el.getAttribute('title'), el.childElementCount === 0 ? el.textContent : null]
            .filter(Boolean).join(' ').toLowerCase();
        if (label.includes(needle)) {{
            const c = center(el);
            if (c) return c;
        }}
    }}
    return null;
}})()"#,
                    prelude = DEEP_SEARCH_PRELUDE,
                    needle = needle
                ))
            }
            UiLocator::SelectorSearch { selector } => {
                let selector = serde_json::to_string(selector).ok()?;
                Some(format!(
                    r#"(() => {{
    {prelude}
    const selector = {selector};
    for (const el of all) {{
        let matched = false;
        try {{ matched = el.matches(selector); }} catch (e) {{ return null; }}
        if (matched) {{
            const c = center(el);
            if (c) return c;
        }}
    }}
    return null;
}})()"#,
                    prelude = DEEP_SEARCH_PRELUDE,
                    selector = selector
                ))
            }
        }
    }

    /// Resolve to viewport coordinates, `None` when nothing matched.
    pub async fn locate<P: PageDriver>(&self, page: &P) -> Result<Option<(f64, f64)>> {
        if let UiLocator::FixedCoordinate { x, y } = self {
            return Ok(Some((*x, *y)));
        }

        let Some(script) = self.search_script() else {
            return Ok(None);
        };
        let value = page.evaluate(&script).await?;
        Ok(parse_point(&value))
    }
}

fn parse_point(value: &serde_json::Value) -> Option<(f64, f64)> {
    let x = value.get("x")?.as_f64()?;
    let y = value.get("y")?.as_f64()?;
    Some((x, y))
}
