//! Path-based navigation of the process group tree.
//!
//! [`CanvasNavigator`] keeps a current process group and moves through
//! the tree the way a shell moves through directories: absolute paths
//! start at the root, `..` goes up one level, and anything else is a
//! `/`-separated list of child group names.

use std::fmt;

use nifitest_core::canvas::{CanvasNode, NodeKind};
use nifitest_core::types::NodeId;
use nifitest_nifi::Canvas;

use crate::error::HarnessError;

/// Separator used in canvas paths.
pub const SEPARATOR: char = '/';

/// Path that moves to the parent group.
pub const PARENT: &str = "..";

/// Cursor over the process group tree of one canvas.
pub struct CanvasNavigator<'a> {
    canvas: &'a dyn Canvas,
    root_id: NodeId,
    current: CanvasNode,
}

impl<'a> CanvasNavigator<'a> {
    /// Start at the root process group.
    pub async fn new(canvas: &'a dyn Canvas) -> Result<Self, HarnessError> {
        let root_id = canvas.root_group_id().await?;
        let current = canvas.process_group(&root_id).await?;
        Ok(Self {
            canvas,
            root_id,
            current,
        })
    }

    /// Start at an arbitrary process group.
    pub async fn at(canvas: &'a dyn Canvas, group_id: &str) -> Result<Self, HarnessError> {
        let root_id = canvas.root_group_id().await?;
        let current = canvas.process_group(group_id).await?;
        Ok(Self {
            canvas,
            root_id,
            current,
        })
    }

    pub fn current(&self) -> &CanvasNode {
        &self.current
    }

    pub fn current_id(&self) -> &str {
        &self.current.id
    }

    pub fn current_name(&self) -> &str {
        &self.current.name
    }

    pub fn current_parent_id(&self) -> Option<&str> {
        self.current.parent_group_id.as_deref()
    }

    pub fn is_at_root(&self) -> bool {
        self.current.id == self.root_id
    }

    /// Jump directly to a process group by id.
    pub async fn move_to(&mut self, group_id: &str) -> Result<(), HarnessError> {
        self.current = self.canvas.process_group(group_id).await?;
        Ok(())
    }

    /// Change the current group.
    ///
    /// A failing segment leaves the navigator at the last group that
    /// resolved; earlier segments are not rolled back.
    pub async fn change_path(&mut self, path: &str) -> Result<(), HarnessError> {
        let relative = match path.strip_prefix(SEPARATOR) {
            Some(rest) => {
                let root_id = self.root_id.clone();
                self.move_to(&root_id).await?;
                rest
            }
            None => path,
        };

        if relative.is_empty() {
            return Ok(());
        }

        if relative == PARENT {
            return match self.current.parent_group_id.clone() {
                Some(parent_id) if !self.is_at_root() => self.move_to(&parent_id).await,
                _ => Ok(()),
            };
        }

        for segment in relative.split(SEPARATOR).filter(|s| !s.is_empty()) {
            let child = self.group(segment).await?;
            tracing::trace!(from = %self.current.name, to = %child.name, "Descending");
            self.current = child;
        }
        Ok(())
    }

    /// Immediate child groups, processors and ports of the current group.
    pub async fn list_children(&self) -> Result<Listing, HarnessError> {
        let mut entries = Vec::new();
        for kind in LISTED_KINDS {
            entries.extend(self.canvas.children(&self.current.id, kind).await?);
        }
        Ok(Listing {
            group: self.current.clone(),
            entries,
        })
    }

    /// Children of the given kind whose name matches exactly.
    pub async fn find(&self, kind: NodeKind, name: &str) -> Result<Vec<CanvasNode>, HarnessError> {
        let children = self.canvas.children(&self.current.id, kind).await?;
        Ok(children.into_iter().filter(|c| c.name == name).collect())
    }

    /// The single child of the given kind with this name.
    pub async fn find_unique(&self, kind: NodeKind, name: &str) -> Result<CanvasNode, HarnessError> {
        let mut matched = self.find(kind, name).await?;
        match matched.len() {
            0 => Err(HarnessError::NotFound {
                kind,
                name: name.to_string(),
                group: self.current.name.clone(),
            }),
            1 => Ok(matched.remove(0)),
            count => Err(HarnessError::Ambiguous {
                kind,
                name: name.to_string(),
                group: self.current.name.clone(),
                count,
            }),
        }
    }

    pub async fn group(&self, name: &str) -> Result<CanvasNode, HarnessError> {
        self.find_unique(NodeKind::ProcessGroup, name).await
    }

    /// All child groups with this name; collisions are not an error.
    pub async fn groups(&self, name: &str) -> Result<Vec<CanvasNode>, HarnessError> {
        self.find(NodeKind::ProcessGroup, name).await
    }

    pub async fn processor(&self, name: &str) -> Result<CanvasNode, HarnessError> {
        self.find_unique(NodeKind::Processor, name).await
    }

    pub async fn input_port(&self, name: &str) -> Result<CanvasNode, HarnessError> {
        self.find_unique(NodeKind::InputPort, name).await
    }

    pub async fn output_port(&self, name: &str) -> Result<CanvasNode, HarnessError> {
        self.find_unique(NodeKind::OutputPort, name).await
    }

    pub async fn controller_service(&self, name: &str) -> Result<CanvasNode, HarnessError> {
        self.find_unique(NodeKind::ControllerService, name).await
    }
}

const LISTED_KINDS: [NodeKind; 4] = [
    NodeKind::ProcessGroup,
    NodeKind::Processor,
    NodeKind::InputPort,
    NodeKind::OutputPort,
];

/// Contents of one process group, as returned by
/// [`CanvasNavigator::list_children`].
#[derive(Debug, Clone)]
pub struct Listing {
    pub group: CanvasNode,
    pub entries: Vec<CanvasNode>,
}

impl Listing {
    pub fn of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &CanvasNode> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Showing contents of {} - {}",
            self.group.id, self.group.name
        )?;
        for entry in &self.entries {
            writeln!(
                f,
                "\t{} - {} - {}",
                entry.id,
                entry.kind.short_label(),
                entry.name
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_display_tags_each_kind() {
        let listing = Listing {
            group: CanvasNode::new("g1", "parent", NodeKind::ProcessGroup),
            entries: vec![
                CanvasNode::new("g2", "child", NodeKind::ProcessGroup),
                CanvasNode::new("p1", "Start", NodeKind::Processor),
                CanvasNode::new("i1", "in", NodeKind::InputPort),
            ],
        };
        let text = listing.to_string();
        assert!(text.starts_with("Showing contents of g1 - parent\n"));
        assert!(text.contains("\tg2 - PG - child\n"));
        assert!(text.contains("\tp1 - Pr - Start\n"));
        assert!(text.contains("\ti1 - IP - in\n"));
        assert_eq!(listing.of_kind(NodeKind::Processor).count(), 1);
    }
}
