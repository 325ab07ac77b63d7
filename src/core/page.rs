use super::error::{PDFError, PDFResult};
use super::parser::PDFObject;
use super::xref::XRef;
use rustc_hash::FxHashSet;

/// Collects the page objects of the document in reading order.
///
/// Walks the `/Pages` tree below the trailer's `/Root` depth-first, taking
/// `/Kids` left to right. Intermediate nodes are labelled `/Pages` and
/// leaves `/Page N` (1-based). A node reached a second time is skipped, so
/// a malformed tree with cycles still terminates.
pub fn collect_pages(xref: &mut XRef) -> PDFResult<Vec<u32>> {
    let root = xref
        .trailer()
        .get("Root")
        .cloned()
        .ok_or_else(|| PDFError::structure(0, "required: /Root"))?;

    let catalog = xref.fetch(&root)?;
    let pages_root = catalog
        .as_dict()
        .and_then(|c| c.get("Pages"))
        .cloned()
        .ok_or_else(|| PDFError::structure(0, "required: /Pages"))?;

    let mut pages = Vec::new();
    let mut visited = FxHashSet::default();
    let mut stack = vec![pages_root];

    while let Some(node) = stack.pop() {
        let Some(num) = node.as_ref_num() else {
            tracing::warn!(node = %node, "page tree node is not an indirect object, skipping");
            continue;
        };
        if !visited.insert(num) {
            tracing::warn!(object = num, "page tree revisits a node, skipping");
            continue;
        }

        let value = xref.fetch(&node)?;
        let Some(dict) = value.as_dict() else {
            tracing::warn!(object = num, "page tree node is not a dictionary, skipping");
            continue;
        };

        let is_leaf = match dict.get("Type").and_then(|t| t.as_name()) {
            Some("Pages") => false,
            Some("Page") => true,
            _ => !dict.contains_key("Kids"),
        };

        if is_leaf {
            pages.push(num);
            xref.set_label(num, format!("/Page {}", pages.len()));
            continue;
        }

        xref.set_label(num, "/Pages");
        let kids = match dict.get("Kids") {
            Some(kids) => xref.fetch(kids)?,
            None => {
                return Err(PDFError::structure(
                    0,
                    format!("required: /Kids in object {}", num),
                ));
            }
        };
        let PDFObject::Array(kids) = kids else {
            return Err(PDFError::structure(
                0,
                format!("required: /Kids array in object {}", num),
            ));
        };

        // Reversed so the leftmost kid is visited first
        stack.extend(kids.into_iter().rev());
    }

    tracing::debug!(pages = pages.len(), "walked page tree");
    Ok(pages)
}
