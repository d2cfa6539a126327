//! Navigation of the container's group tree
//!
//! Entries are addressed by their position (child indices from the root
//! group) so a walk can be done once and materialized later.

use keepass::db::{Entry, Group, Node};
use tracing::warn;

use crate::entry;

/// An entry found by [`walk`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// Group path: ancestor group names plus the entry title
    pub path: String,
    /// Child indices leading from the root group to the entry
    pub indices: Vec<usize>,
}

/// Every titled entry below `root`, depth first
pub fn walk(root: &Group) -> Vec<Located> {
    let mut found = Vec::new();
    let mut indices = Vec::new();
    walk_group(root, "", &mut indices, &mut found);
    found
}

fn walk_group(group: &Group, prefix: &str, indices: &mut Vec<usize>, found: &mut Vec<Located>) {
    for (i, node) in group.children.iter().enumerate() {
        indices.push(i);
        match node {
            Node::Group(child) => {
                let prefix = entry::join(prefix, &child.name);
                walk_group(child, &prefix, indices, found);
            }
            Node::Entry(e) => match e.get_title() {
                Some(title) if !title.is_empty() => found.push(Located {
                    path: entry::join(prefix, title),
                    indices: indices.clone(),
                }),
                _ => warn!(group = %prefix, "skipping entry without a title"),
            },
        }
        indices.pop();
    }
}

pub fn entry_at<'a>(root: &'a Group, indices: &[usize]) -> Option<&'a Entry> {
    let (last, parents) = indices.split_last()?;
    let mut group = root;
    for &i in parents {
        match group.children.get(i)? {
            Node::Group(child) => group = child,
            Node::Entry(_) => return None,
        }
    }
    match group.children.get(*last)? {
        Node::Entry(e) => Some(e),
        Node::Group(_) => None,
    }
}

pub fn entry_at_mut<'a>(root: &'a mut Group, indices: &[usize]) -> Option<&'a mut Entry> {
    let (last, parents) = indices.split_last()?;
    let group = parent_mut(root, parents)?;
    match group.children.get_mut(*last)? {
        Node::Entry(e) => Some(e),
        Node::Group(_) => None,
    }
}

fn parent_mut<'a>(root: &'a mut Group, indices: &[usize]) -> Option<&'a mut Group> {
    let mut group = root;
    for &i in indices {
        match group.children.get_mut(i)? {
            Node::Group(child) => group = child,
            Node::Entry(_) => return None,
        }
    }
    Some(group)
}

/// Descend by group names, optionally creating missing groups
pub fn group_mut<'a>(root: &'a mut Group, segments: &[&str], create: bool) -> Option<&'a mut Group> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(root);
    };

    let position = root
        .children
        .iter()
        .position(|node| matches!(node, Node::Group(g) if g.name == *first));
    let index = match position {
        Some(i) => i,
        None if create => {
            root.children.push(Node::Group(Group::new(first)));
            root.children.len() - 1
        }
        None => return None,
    };

    match &mut root.children[index] {
        Node::Group(child) => group_mut(child, rest, create),
        Node::Entry(_) => None,
    }
}

/// Detach the entry at `indices`
///
/// Indices of later siblings shift; callers removing several entries
/// should go from the highest position down.
pub fn take_at(root: &mut Group, indices: &[usize]) -> Option<Entry> {
    let (last, parents) = indices.split_last()?;
    let group = parent_mut(root, parents)?;
    if !matches!(group.children.get(*last)?, Node::Entry(_)) {
        return None;
    }
    match group.children.remove(*last) {
        Node::Entry(e) => Some(e),
        Node::Group(_) => None,
    }
}

/// Remove groups along `segments` that have become empty, deepest first.
/// The root group itself is never removed.
pub fn prune(root: &mut Group, segments: &[&str]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };

    let Some(index) = root
        .children
        .iter()
        .position(|node| matches!(node, Node::Group(g) if g.name == *first))
    else {
        return;
    };

    let empty = match &mut root.children[index] {
        Node::Group(child) => {
            prune(child, rest);
            child.children.is_empty()
        }
        Node::Entry(_) => false,
    };
    if empty {
        root.children.remove(index);
    }
}
