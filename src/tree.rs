use crate::error::PipelineError;
use std::collections::BTreeSet;

/// Arena-allocated phylogenetic tree parsed from Newick text.
///
/// Internal-node labels that parse as numbers are interpreted as branch
/// supports for the edge above the node, which is how every tree-search
/// engine we consume writes them.
#[derive(Debug, Clone)]
pub struct Tree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub label: Option<String>,
    pub length: Option<f64>,
    pub support: Option<f64>,
}

/// A gene tree estimated for one locus, supports normalized to 0-1.
#[derive(Debug, Clone)]
pub struct GeneTree {
    pub locus_id: u32,
    pub locus_name: String,
    pub tree: Tree,
    pub model: String,
}

struct Parser<'a> {
    text: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')) {
            self.pos += 1;
        }
    }

    fn token(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, b'(' | b')' | b',' | b':' | b';' | b' ' | b'\t' | b'\n' | b'\r') {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.text[start..self.pos]).into_owned()
    }

    fn number(&mut self) -> Result<f64, PipelineError> {
        let tok = self.token();
        tok.parse::<f64>()
            .map_err(|_| PipelineError::Parse(format!("expected number in newick, got '{}'", tok)))
    }

    fn subtree(&mut self, tree: &mut Tree, parent: Option<usize>) -> Result<usize, PipelineError> {
        self.skip_ws();
        let idx = tree.nodes.len();
        tree.nodes.push(Node {
            parent,
            ..Node::default()
        });

        if self.peek() == Some(b'(') {
            self.bump();
            loop {
                let child = self.subtree(tree, Some(idx))?;
                tree.nodes[idx].children.push(child);
                self.skip_ws();
                match self.bump() {
                    Some(b',') => continue,
                    Some(b')') => break,
                    other => {
                        return Err(PipelineError::Parse(format!(
                            "unbalanced newick near byte {} ({:?})",
                            self.pos, other
                        )))
                    }
                }
            }
            self.skip_ws();
            // Internal label: numeric means branch support.
            let label = self.token();
            if !label.is_empty() {
                match label.parse::<f64>() {
                    Ok(s) => tree.nodes[idx].support = Some(s),
                    Err(_) => tree.nodes[idx].label = Some(label),
                }
            }
        } else {
            let label = self.token();
            if label.is_empty() {
                return Err(PipelineError::Parse(format!(
                    "empty leaf label near byte {}",
                    self.pos
                )));
            }
            tree.nodes[idx].label = Some(label);
        }

        self.skip_ws();
        if self.peek() == Some(b':') {
            self.bump();
            tree.nodes[idx].length = Some(self.number()?);
        }
        Ok(idx)
    }
}

impl Tree {
    pub fn parse_newick(text: &str) -> Result<Tree, PipelineError> {
        let mut tree = Tree {
            nodes: Vec::new(),
            root: 0,
        };
        let mut parser = Parser {
            text: text.as_bytes(),
            pos: 0,
        };
        let root = parser.subtree(&mut tree, None)?;
        parser.skip_ws();
        if parser.peek() != Some(b';') {
            return Err(PipelineError::Parse("newick missing trailing ';'".into()));
        }
        tree.root = root;
        Ok(tree)
    }

    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        self.write_node(self.root, &mut out);
        out.push(';');
        out
    }

    fn write_node(&self, idx: usize, out: &mut String) {
        let node = &self.nodes[idx];
        if !node.children.is_empty() {
            out.push('(');
            for (i, &c) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_node(c, out);
            }
            out.push(')');
            if let Some(s) = node.support {
                out.push_str(&format_float(s));
            } else if let Some(l) = &node.label {
                out.push_str(l);
            }
        } else if let Some(l) = &node.label {
            out.push_str(l);
        }
        if let Some(len) = node.length {
            out.push(':');
            out.push_str(&format_float(len));
        }
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    pub fn leaf_labels(&self) -> Vec<String> {
        let mut out = Vec::new();
        for node in &self.nodes {
            if node.children.is_empty() {
                if let Some(l) = &node.label {
                    out.push(l.clone());
                }
            }
        }
        out
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.children.is_empty() && n.label.is_some())
            .count()
    }

    /// Mean support over internal edges that carry one. None when the
    /// tree has no annotated internal edge.
    pub fn mean_support(&self) -> Option<f64> {
        let supports: Vec<f64> = self.nodes.iter().filter_map(|n| n.support).collect();
        if supports.is_empty() {
            None
        } else {
            Some(supports.iter().sum::<f64>() / supports.len() as f64)
        }
    }

    /// Rescale all supports by `divisor`, clamping into the unit interval.
    pub fn normalize_supports(&mut self, divisor: f64) {
        for node in &mut self.nodes {
            if let Some(s) = node.support {
                node.support = Some((s / divisor).clamp(0.0, 1.0));
            }
        }
    }

    fn leafset_below(&self, idx: usize, out: &mut BTreeSet<String>) {
        let node = &self.nodes[idx];
        if node.children.is_empty() {
            if let Some(l) = &node.label {
                out.insert(l.clone());
            }
        } else {
            for &c in &node.children {
                self.leafset_below(c, out);
            }
        }
    }

    /// Non-trivial clusters of the tree, each expressed as the split
    /// side not containing `reference`. Sides are canonical so that
    /// identical splits from different trees compare equal.
    pub fn splits(&self, reference: &str) -> Vec<BTreeSet<String>> {
        let all: BTreeSet<String> = self.leaf_labels().into_iter().collect();
        let n = all.len();
        // Both child edges of a binary root describe the same split;
        // deduplicate so each split counts once per tree.
        let mut seen: BTreeSet<BTreeSet<String>> = BTreeSet::new();
        let mut out = Vec::new();
        for idx in 0..self.nodes.len() {
            let node = &self.nodes[idx];
            if node.children.is_empty() || node.parent.is_none() {
                continue;
            }
            let mut below = BTreeSet::new();
            self.leafset_below(idx, &mut below);
            let side = if below.contains(reference) {
                all.difference(&below).cloned().collect::<BTreeSet<String>>()
            } else {
                below
            };
            if side.len() >= 2 && side.len() <= n.saturating_sub(2) && seen.insert(side.clone()) {
                out.push(side);
            }
        }
        out
    }

    fn neighbors(&self, idx: usize) -> Vec<usize> {
        let mut out = self.nodes[idx].children.clone();
        if let Some(p) = self.nodes[idx].parent {
            out.push(p);
        }
        out
    }

    fn edge_length(&self, a: usize, b: usize) -> f64 {
        // Length is stored on the child end of the directed edge.
        let child = if self.nodes[a].parent == Some(b) { a } else { b };
        self.nodes[child].length.unwrap_or(1.0)
    }

    /// Farthest node from `start` over the unrooted topology, with the
    /// predecessor map for path reconstruction.
    fn farthest_from(&self, start: usize) -> (usize, f64, Vec<Option<usize>>) {
        let mut prev = vec![None; self.nodes.len()];
        let mut dist = vec![f64::NEG_INFINITY; self.nodes.len()];
        let mut stack = vec![start];
        dist[start] = 0.0;
        let mut best = (start, 0.0);
        while let Some(cur) = stack.pop() {
            for nb in self.neighbors(cur) {
                if dist[nb] > f64::NEG_INFINITY {
                    continue;
                }
                prev[nb] = Some(cur);
                dist[nb] = dist[cur] + self.edge_length(cur, nb);
                if self.nodes[nb].children.is_empty() && dist[nb] > best.1 {
                    best = (nb, dist[nb]);
                }
                stack.push(nb);
            }
        }
        (best.0, best.1, prev)
    }

    /// Reroot on the edge between `child` and its parent, placing the
    /// new root `dist_from_child` along that edge.
    fn reroot_on_edge(&self, child: usize, dist_from_child: f64) -> Result<Tree, PipelineError> {
        let parent = self.nodes[child].parent.ok_or_else(|| {
            PipelineError::Parse("cannot reroot on the root node itself".into())
        })?;
        let edge = self.edge_length(child, parent);
        let mut new = Tree {
            nodes: vec![Node::default()],
            root: 0,
        };
        let below = self.copy_rooted(&mut new, child, parent, 0);
        new.nodes[below].length = Some(dist_from_child.min(edge));
        let above = self.copy_rooted(&mut new, parent, child, 0);
        new.nodes[above].length = Some((edge - dist_from_child).max(0.0));
        new.nodes[0].children = vec![below, above];
        new.suppress_unary();
        Ok(new)
    }

    /// Copy the subtree reachable from `cur` without crossing `prev`,
    /// attaching it under `parent_new` in the new arena.
    fn copy_rooted(&self, new: &mut Tree, cur: usize, prev: usize, parent_new: usize) -> usize {
        let idx = new.nodes.len();
        new.nodes.push(Node {
            parent: Some(parent_new),
            children: Vec::new(),
            label: self.nodes[cur].label.clone(),
            support: self.nodes[cur].support,
            length: None,
        });
        for nb in self.neighbors(cur) {
            if nb == prev {
                continue;
            }
            let c = self.copy_rooted(new, nb, cur, idx);
            new.nodes[c].length.get_or_insert(self.edge_length(cur, nb));
            new.nodes[idx].children.push(c);
        }
        idx
    }

    /// Remove internal nodes left with a single child after rerooting,
    /// merging their branch lengths.
    fn suppress_unary(&mut self) {
        loop {
            let mut target = None;
            for idx in 0..self.nodes.len() {
                if self.nodes[idx].children.len() == 1 && self.nodes[idx].parent.is_some() {
                    target = Some(idx);
                    break;
                }
            }
            let Some(idx) = target else { break };
            let child = self.nodes[idx].children[0];
            let parent = self.nodes[idx].parent.unwrap();
            let merged = self.nodes[idx].length.unwrap_or(0.0)
                + self.nodes[child].length.unwrap_or(0.0);
            self.nodes[child].length = Some(merged);
            self.nodes[child].parent = Some(parent);
            let pos = self.nodes[parent]
                .children
                .iter()
                .position(|&c| c == idx)
                .unwrap();
            self.nodes[parent].children[pos] = child;
            self.nodes[idx].children.clear();
            self.nodes[idx].parent = None;
            self.nodes[idx].label = None;
        }
    }

    /// Reroot so the named taxon is the first child of the root,
    /// splitting its pendant edge in half.
    pub fn root_with_outgroup(&self, outgroup: &str) -> Result<Tree, PipelineError> {
        let leaf = self
            .nodes
            .iter()
            .position(|n| n.children.is_empty() && n.label.as_deref() == Some(outgroup))
            .ok_or_else(|| {
                PipelineError::Parse(format!("outgroup taxon '{}' not found in tree", outgroup))
            })?;
        let half = self.edge_length(leaf, self.nodes[leaf].parent.unwrap_or(leaf)) / 2.0;
        self.reroot_on_edge(leaf, half)
    }

    /// Reroot at the midpoint of the longest leaf-to-leaf path.
    pub fn root_midpoint(&self) -> Result<Tree, PipelineError> {
        let first_leaf = self
            .nodes
            .iter()
            .position(|n| n.children.is_empty())
            .ok_or_else(|| PipelineError::Parse("tree has no leaves".into()))?;
        let (a, _, _) = self.farthest_from(first_leaf);
        let (b, diameter, prev) = self.farthest_from(a);
        // Walk back from b toward a until we pass the halfway mark.
        let half = diameter / 2.0;
        let mut cur = b;
        let mut walked = 0.0;
        while let Some(p) = prev[cur] {
            let e = self.edge_length(cur, p);
            if walked + e >= half {
                let remaining = half - walked;
                // Express as distance from the child end of the edge.
                let (child, from_child) = if self.nodes[cur].parent == Some(p) {
                    (cur, remaining)
                } else {
                    (p, e - remaining)
                };
                return self.reroot_on_edge(child, from_child);
            }
            walked += e;
            cur = p;
        }
        // Degenerate path (two-leaf tree); keep the original rooting.
        Ok(self.clone())
    }
}

fn format_float(v: f64) -> String {
    if (v - v.round()).abs() < 1e-9 && v.abs() < 1e12 {
        format!("{}", v.round() as i64)
    } else {
        let s = format!("{:.6}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
