use super::{EntryKind, Hierarchy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeElement {
    Space,      // Spacing for parent that is last (renders as "   ")
    Vertical,   // │ (parent has siblings) - renders as "│  "
    Branch,     // ├ (middle child) - renders as "├─ "
    LastBranch, // └ (last child) - renders as "└─ "
}

impl TreeElement {
    fn as_str(self) -> &'static str {
        match self {
            TreeElement::Space => "   ",
            TreeElement::Vertical => "│  ",
            TreeElement::Branch => "├─ ",
            TreeElement::LastBranch => "└─ ",
        }
    }
}

/// Render the visible rows of the hierarchy, one line per row
pub fn render_tree(hierarchy: &Hierarchy) -> Vec<String> {
    let entries = hierarchy.entries();
    let mut lines = Vec::new();
    // prefix[d] describes the column for depth d + 1
    let mut prefix: Vec<TreeElement> = Vec::new();

    for entry in hierarchy.visible_rows() {
        prefix.truncate(entry.depth.saturating_sub(1));

        if let Some(parent) = entry.parent {
            // Replace the parent's branch element with its continuation
            if let Some(last) = prefix.last_mut() {
                *last = match *last {
                    TreeElement::Branch => TreeElement::Vertical,
                    TreeElement::LastBranch => TreeElement::Space,
                    other => other,
                };
            }
            let is_last = entries[parent].children.last() == Some(&entry.flat_index);
            prefix.push(if is_last {
                TreeElement::LastBranch
            } else {
                TreeElement::Branch
            });
        }

        let marker = match entry.kind {
            EntryKind::Task(_) if entry.children.is_empty() => "• ",
            EntryKind::Task(_) if entry.open => "▾ ",
            EntryKind::Task(_) => "▸ ",
            EntryKind::Object(_) => "◆ ",
        };

        let mut line: String = prefix.iter().map(|e| e.as_str()).collect();
        line.push_str(marker);
        line.push_str(&entry.name);
        line.push_str(&format!("  [{}..{}]", entry.first_event, entry.last_event));
        lines.push(line);
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{RawTrace, TraceGraph};

    #[test]
    fn test_render_prefixes() {
        let graph = TraceGraph::build(
            RawTrace::from_slice(
                br#"{
                    "tasks": [
                        {"created_by": 0, "first_step": 0, "name": "main"},
                        {"created_by": 0, "first_step": 0},
                        {"created_by": 1, "first_step": 0},
                        {"created_by": 0, "first_step": 0}
                    ],
                    "events": [[0, null, "Tick", null]]
                }"#,
            )
            .unwrap(),
        )
        .unwrap();
        let hierarchy = Hierarchy::build(&graph);
        let lines = render_tree(&hierarchy);

        assert_eq!(
            lines,
            vec![
                "▾ main (0)  [0..0]",
                "├─ ▾ thread 1  [0..0]",
                "│  └─ • thread 2  [0..0]",
                "└─ • thread 3  [0..0]",
            ]
        );
    }
}
