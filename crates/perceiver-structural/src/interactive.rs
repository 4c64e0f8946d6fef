//! Paged listing of the interactable elements found in a snapshot.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::str::FromStr;

use action_locator::BoundingBox;
use cdp_adapter::FrameId;
use serde::{Deserialize, Serialize};

use crate::errors::SnapshotError;
use crate::model::{AxNode, Snapshot};

const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "select", "textarea", "option", "summary",
];

const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "textbox",
    "searchbox",
    "checkbox",
    "radio",
    "combobox",
    "listbox",
    "option",
    "slider",
    "spinbutton",
    "switch",
    "tab",
];

pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 20;

pub(crate) fn is_interactable(node: &AxNode) -> bool {
    if node
        .tag_name
        .as_deref()
        .is_some_and(|tag| INTERACTIVE_TAGS.contains(&tag))
    {
        return true;
    }
    INTERACTIVE_ROLES.contains(&node.role.as_str()) || node.role.starts_with("menuitem")
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementFilter {
    Button,
    Input,
    Link,
    Select,
    Textarea,
    #[default]
    All,
}

impl ElementFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementFilter::Button => "button",
            ElementFilter::Input => "input",
            ElementFilter::Link => "link",
            ElementFilter::Select => "select",
            ElementFilter::Textarea => "textarea",
            ElementFilter::All => "all",
        }
    }

    /// Classifies a node by tag, falling back to its role for custom widgets.
    pub fn classify(node: &AxNode) -> Option<ElementFilter> {
        let by_tag = match node.tag_name.as_deref() {
            Some("button") => Some(ElementFilter::Button),
            Some("input") => Some(ElementFilter::Input),
            Some("a") => Some(ElementFilter::Link),
            Some("select") => Some(ElementFilter::Select),
            Some("textarea") => Some(ElementFilter::Textarea),
            _ => None,
        };
        by_tag.or(match node.role.as_str() {
            "button" => Some(ElementFilter::Button),
            "link" => Some(ElementFilter::Link),
            "textbox" | "searchbox" => Some(ElementFilter::Input),
            "combobox" | "listbox" => Some(ElementFilter::Select),
            _ => None,
        })
    }

    fn admits(&self, kind: Option<ElementFilter>) -> bool {
        *self == ElementFilter::All || kind == Some(*self)
    }
}

impl fmt::Display for ElementFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementFilter {
    type Err = SnapshotError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "button" => Ok(ElementFilter::Button),
            "input" => Ok(ElementFilter::Input),
            "link" => Ok(ElementFilter::Link),
            "select" => Ok(ElementFilter::Select),
            "textarea" => Ok(ElementFilter::Textarea),
            "all" => Ok(ElementFilter::All),
            other => Err(SnapshotError::invalid(format!(
                "invalid element type '{other}', expected one of: button, input, link, select, textarea, all"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementQuery {
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
    pub element_type: ElementFilter,
    /// 1-based element position; when set it selects the page containing it
    pub start_index: Option<usize>,
}

impl Default for ElementQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            element_type: ElementFilter::All,
            start_index: None,
        }
    }
}

impl ElementQuery {
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.page < 1 {
            return Err(SnapshotError::invalid(format!(
                "page must be >= 1, got {}",
                self.page
            )));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(SnapshotError::invalid(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        if self.start_index == Some(0) {
            return Err(SnapshotError::invalid("start_index must be >= 1, got 0"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveElement {
    /// 1-based position among all interactable elements of the snapshot, before filtering
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ElementFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_node_id: Option<i64>,
    pub frame_id: FrameId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl InteractiveElement {
    fn from_node(index: usize, node: &AxNode) -> Self {
        Self {
            index,
            kind: ElementFilter::classify(node),
            tag_name: node.tag_name.clone(),
            role: node.role.clone(),
            name: node.name.clone(),
            backend_node_id: node.backend_node_id,
            frame_id: node.frame_id.clone(),
            bounds: node.bounds,
            attributes: node.attributes.clone(),
        }
    }

    /// Tag name, or the AX role for nodes without a backing element.
    pub fn label(&self) -> &str {
        self.tag_name.as_deref().unwrap_or(&self.role)
    }

    fn action_hint(&self) -> &'static str {
        let attr = |name: &str| self.attributes.get(name).map(String::as_str);
        match self.kind {
            Some(ElementFilter::Button) if attr("type") == Some("submit") => "Click to submit form",
            Some(ElementFilter::Button) => "Click to perform action",
            Some(ElementFilter::Input) => match attr("type") {
                Some("email") => "Enter email address",
                Some("password") => "Enter password",
                Some("text") => "Enter text input",
                _ => "Enter input value",
            },
            Some(ElementFilter::Link) if attr("href").is_some() => "Click to navigate to link",
            Some(ElementFilter::Link) => "Click to activate link",
            Some(ElementFilter::Select) => "Click to open dropdown and select option",
            Some(ElementFilter::Textarea) => "Click to enter multi-line text",
            _ => "Click to interact with element",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: usize,
    pub page_size: usize,
    pub total_elements: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    /// 1-based index of the first element on this page
    pub start_index: usize,
    /// 1-based index of the last element on this page
    pub end_index: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementPage {
    pub elements: Vec<InteractiveElement>,
    pub pagination: Pagination,
    /// Present only when a type filter other than `all` applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<ElementFilter>,
}

/// Every interactable node of `snapshot`, in frame then document order.
pub fn collect_interactive(snapshot: &Snapshot) -> Vec<InteractiveElement> {
    snapshot
        .nodes()
        .filter(|node| is_interactable(node))
        .enumerate()
        .map(|(i, node)| InteractiveElement::from_node(i + 1, node))
        .collect()
}

/// Filters then slices `elements`. A page past the end clamps to the last page.
pub fn paginate(
    elements: Vec<InteractiveElement>,
    query: &ElementQuery,
) -> Result<ElementPage, SnapshotError> {
    query.validate()?;

    let filter = query.element_type;
    let elements: Vec<_> = elements
        .into_iter()
        .filter(|el| filter.admits(el.kind))
        .collect();

    let size = query.page_size;
    let total = elements.len();
    let total_pages = total.div_ceil(size);

    let mut page = match query.start_index {
        Some(start) => (start - 1) / size + 1,
        None => query.page,
    };
    if total_pages > 0 && page > total_pages {
        page = total_pages;
    }

    let start = ((page - 1) * size).min(total);
    let end = (start + size).min(total);
    let pagination = Pagination {
        current_page: page,
        page_size: size,
        total_elements: total,
        total_pages,
        has_next_page: page < total_pages,
        has_previous_page: page > 1,
        start_index: start + 1,
        end_index: end,
    };

    Ok(ElementPage {
        elements: elements.into_iter().skip(start).take(end - start).collect(),
        pagination,
        filter: (filter != ElementFilter::All).then_some(filter),
    })
}

impl ElementPage {
    /// Renders the page as markdown for a planning model.
    pub fn to_markdown(&self) -> String {
        let p = &self.pagination;
        let mut out = String::new();
        let _ = writeln!(out, "# DOM Elements - Page {} of {}\n", p.current_page, p.total_pages);
        let _ = writeln!(
            out,
            "**Total Found**: {} elements | **Showing**: Elements {}-{} | **Filter**: {}\n",
            p.total_elements,
            p.start_index,
            p.end_index,
            self.filter.map(|f| f.as_str()).unwrap_or("all types"),
        );
        out.push_str("---\n\n");

        if self.elements.is_empty() {
            out.push_str("## No Elements Found\n\n");
            out.push_str("No interactive elements match the current filter criteria.\n\n");
        } else {
            out.push_str("## Elements\n\n");
            for (i, el) in self.elements.iter().enumerate() {
                let _ = writeln!(out, "### Element [{}]", el.index);
                let mut details = format!("**Type**: {}", el.label());
                if let Some(name) = el.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                    let _ = write!(details, " | **Text**: \"{name}\"");
                }
                let _ = writeln!(out, "{details}  ");
                let attrs: Vec<String> = el
                    .attributes
                    .iter()
                    .filter(|(_, v)| !v.is_empty())
                    .map(|(k, v)| format!("{k}=\"{v}\""))
                    .collect();
                if !attrs.is_empty() {
                    let _ = writeln!(out, "**Attributes**: `{}`  ", attrs.join(" "));
                }
                let _ = writeln!(out, "**Action**: {}", el.action_hint());
                if i + 1 < self.elements.len() {
                    out.push('\n');
                }
            }
        }

        out.push_str("\n---\n\n");
        let _ = writeln!(out, "**Navigation**: {}", self.navigation());
        out
    }

    fn navigation(&self) -> String {
        let p = &self.pagination;
        let mut parts = vec![
            if p.has_previous_page {
                format!("Previous: page={}", p.current_page - 1)
            } else {
                "Previous: N/A".to_string()
            },
            if p.has_next_page {
                format!("Next: page={}", p.current_page + 1)
            } else {
                "Next: N/A".to_string()
            },
        ];
        if p.total_pages > 1 {
            let pages: Vec<String> = (1..=p.total_pages).map(|n| n.to_string()).collect();
            parts.push(format!("Pages: {}", pages.join(", ")));
        }
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(tag: Option<&str>, role: &str) -> AxNode {
        AxNode {
            node_id: "1".into(),
            role: role.into(),
            name: Some(format!("{role} label")),
            value: None,
            description: None,
            properties: BTreeMap::new(),
            backend_node_id: Some(1),
            tag_name: tag.map(str::to_string),
            attributes: BTreeMap::new(),
            bounds: None,
            frame_id: FrameId("F1".into()),
            children: Vec::new(),
        }
    }

    fn elements(buttons: usize, links: usize) -> Vec<InteractiveElement> {
        let mut out = Vec::new();
        for _ in 0..buttons {
            out.push(InteractiveElement::from_node(out.len() + 1, &node(Some("button"), "button")));
        }
        for _ in 0..links {
            out.push(InteractiveElement::from_node(out.len() + 1, &node(Some("a"), "link")));
        }
        out
    }

    #[test]
    fn interactable_nodes_are_recognised_by_tag_or_role() {
        assert!(is_interactable(&node(Some("summary"), "DisclosureTriangle")));
        assert!(is_interactable(&node(Some("div"), "menuitemcheckbox")));
        assert!(is_interactable(&node(None, "switch")));
        assert!(!is_interactable(&node(Some("div"), "generic")));
        assert!(!is_interactable(&node(None, "StaticText")));

        assert_eq!(ElementFilter::classify(&node(Some("a"), "link")), Some(ElementFilter::Link));
        assert_eq!(
            ElementFilter::classify(&node(Some("div"), "searchbox")),
            Some(ElementFilter::Input)
        );
        assert_eq!(ElementFilter::classify(&node(Some("div"), "tab")), None);
    }

    #[test]
    fn queries_are_validated() {
        assert!(ElementQuery::default().validate().is_ok());
        let bad = [
            ElementQuery { page: 0, ..Default::default() },
            ElementQuery { page_size: 0, ..Default::default() },
            ElementQuery { page_size: 101, ..Default::default() },
            ElementQuery { start_index: Some(0), ..Default::default() },
        ];
        for query in bad {
            assert!(matches!(query.validate(), Err(SnapshotError::InvalidArgument(_))));
        }
        assert!("links".parse::<ElementFilter>().is_err());
        assert_eq!("textarea".parse::<ElementFilter>().unwrap(), ElementFilter::Textarea);
    }

    #[test]
    fn pages_slice_and_clamp() {
        let query = ElementQuery { page: 2, page_size: 10, ..Default::default() };
        let page = paginate(elements(25, 0), &query).unwrap();
        assert_eq!(page.elements.len(), 10);
        assert_eq!(page.elements[0].index, 11);
        assert_eq!(
            page.pagination,
            Pagination {
                current_page: 2,
                page_size: 10,
                total_elements: 25,
                total_pages: 3,
                has_next_page: true,
                has_previous_page: true,
                start_index: 11,
                end_index: 20,
            }
        );
        assert!(page.filter.is_none());

        let past_end = ElementQuery { page: 9, page_size: 10, ..Default::default() };
        let last = paginate(elements(25, 0), &past_end).unwrap();
        assert_eq!(last.pagination.current_page, 3);
        assert_eq!(last.elements.len(), 5);
        assert!(!last.pagination.has_next_page);

        let by_start = ElementQuery { page: 1, page_size: 10, start_index: Some(21), ..Default::default() };
        assert_eq!(paginate(elements(25, 0), &by_start).unwrap().pagination.current_page, 3);
    }

    #[test]
    fn filters_keep_original_indices() {
        let query = ElementQuery { element_type: ElementFilter::Link, ..Default::default() };
        let page = paginate(elements(3, 2), &query).unwrap();
        assert_eq!(page.filter, Some(ElementFilter::Link));
        assert_eq!(page.pagination.total_elements, 2);
        let indices: Vec<_> = page.elements.iter().map(|el| el.index).collect();
        assert_eq!(indices, vec![4, 5]);
    }

    #[test]
    fn markdown_lists_elements_and_navigation() {
        let query = ElementQuery { page_size: 2, ..Default::default() };
        let mut all = elements(1, 2);
        all[0].attributes.insert("type".into(), "submit".into());
        all[1].attributes.insert("href".into(), "/docs".into());
        let md = paginate(all, &query).unwrap().to_markdown();

        assert!(md.starts_with("# DOM Elements - Page 1 of 2\n"));
        assert!(md.contains("**Showing**: Elements 1-2 | **Filter**: all types"));
        assert!(md.contains("### Element [1]\n**Type**: button | **Text**: \"button label\"  \n"));
        assert!(md.contains("**Action**: Click to submit form"));
        assert!(md.contains("**Attributes**: `href=\"/docs\"`"));
        assert!(md.contains("**Navigation**: Previous: N/A | Next: page=2 | Pages: 1, 2"));

        let empty = paginate(Vec::new(), &ElementQuery::default()).unwrap();
        assert_eq!(empty.pagination.total_pages, 0);
        assert!(empty.to_markdown().contains("## No Elements Found"));
    }
}
