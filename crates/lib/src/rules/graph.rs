//! Compiling rules into a dispatch table.
//!
//! Construction walks from every declared [`Query`] through rule inputs and
//! declared gets, choosing exactly one provider for each `(product,
//! available params)` pair. The result is an immutable graph of entries the
//! scheduler dispatches on without any further type matching.

use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{self, Write as _};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::rules::error::GraphError;
use crate::rules::rule::{GetDecl, Rule};
use crate::rules::types::{ParamValue, TypeKey};

/// Index of an entry in a [`RuleGraph`].
pub type EntryId = NodeIndex;

/// How one `(product, params)` pair is satisfied.
#[derive(Debug, Clone)]
pub enum Entry {
  /// Taken directly from the request's params.
  Param(TypeKey),
  /// Computed by a rule.
  Rule(RuleEntry),
  /// Placeholder for a pair whose resolution failed.
  Unresolved(TypeKey),
}

/// A rule bound to concrete providers for each of its inputs and gets.
#[derive(Debug, Clone)]
pub struct RuleEntry {
  pub(crate) rule: usize,
  pub(crate) product: TypeKey,
  pub(crate) inputs: Vec<(TypeKey, EntryId)>,
  pub(crate) gets: Vec<(GetDecl, EntryId)>,
  pub(crate) used_params: BTreeSet<TypeKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
  Input,
  Get(GetDecl),
}

/// A root entry point: a product requested with a fixed set of param types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
  pub product: TypeKey,
  pub params: BTreeSet<TypeKey>,
}

impl Query {
  pub fn new<P: Any>() -> Self {
    Self {
      product: TypeKey::of::<P>(),
      params: BTreeSet::new(),
    }
  }

  pub fn param<T: ParamValue>(mut self) -> Self {
    self.params.insert(TypeKey::of::<T>());
    self
  }
}

impl fmt::Display for Query {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Query({} for {})", self.product, format_types(&self.params))
  }
}

pub(crate) fn format_types<'a>(types: impl IntoIterator<Item = &'a TypeKey>) -> String {
  let names: Vec<String> = types.into_iter().map(|t| t.to_string()).collect();
  names.join(", ")
}

/// Collects rules and queries for [`RuleGraph::build`].
#[derive(Debug, Default)]
pub struct RuleGraphBuilder {
  rules: Vec<Rule>,
  queries: Vec<Query>,
}

impl RuleGraphBuilder {
  pub fn rule(mut self, rule: Rule) -> Self {
    self.rules.push(rule);
    self
  }

  pub fn rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
    self.rules.extend(rules);
    self
  }

  pub fn query(mut self, query: Query) -> Self {
    if !self.queries.contains(&query) {
      self.queries.push(query);
    }
    self
  }

  pub fn queries(mut self, queries: impl IntoIterator<Item = Query>) -> Self {
    for query in queries {
      self = self.query(query);
    }
    self
  }

  pub fn build(self) -> Result<RuleGraph, GraphError> {
    RuleGraph::build(self.rules, self.queries)
  }
}

/// The compiled, immutable rule graph.
#[derive(Debug)]
pub struct RuleGraph {
  rules: Vec<Rule>,
  graph: DiGraph<Entry, Edge>,
  queries: HashMap<Query, EntryId>,
}

impl RuleGraph {
  pub fn builder() -> RuleGraphBuilder {
    RuleGraphBuilder::default()
  }

  fn build(rules: Vec<Rule>, queries: Vec<Query>) -> Result<Self, GraphError> {
    let mut names = HashSet::new();
    for rule in &rules {
      if !names.insert(rule.name.as_str()) {
        return Err(GraphError::DuplicateRule {
          name: rule.name.clone(),
        });
      }
    }

    let mut resolver = Resolver::new(&rules);
    let mut roots = HashMap::new();
    for query in queries {
      let id = resolver.resolve(query.product, &query.params)?;
      roots.insert(query, id);
    }

    let (mut graph, roots) = retain_reachable(resolver.graph, roots);
    for (query, root) in &roots {
      if let Some(product) = first_unresolved(&graph, *root) {
        return Err(GraphError::Unresolved {
          query: query.to_string(),
          product: product.to_string(),
        });
      }
    }
    compute_used_params(&mut graph);

    let graph = Self {
      rules,
      graph,
      queries: roots,
    };
    debug!(
      rules = graph.rules.len(),
      queries = graph.queries.len(),
      entries = graph.entry_count(),
      "compiled rule graph"
    );
    Ok(graph)
  }

  /// The entry serving `product` for exactly the given param types.
  pub fn query_entry(&self, product: TypeKey, params: &BTreeSet<TypeKey>) -> Result<EntryId, GraphError> {
    let query = Query {
      product,
      params: params.clone(),
    };
    self.queries.get(&query).copied().ok_or_else(|| GraphError::NoQuery {
      product: product.to_string(),
      params: format_types(params),
    })
  }

  pub fn entry(&self, id: EntryId) -> &Entry {
    &self.graph[id]
  }

  pub(crate) fn rule_at(&self, index: usize) -> &Rule {
    &self.rules[index]
  }

  /// Param types the entry transitively consumes.
  pub fn used_params(&self, id: EntryId) -> BTreeSet<TypeKey> {
    match &self.graph[id] {
      Entry::Param(ty) => BTreeSet::from([*ty]),
      Entry::Rule(entry) => entry.used_params.clone(),
      Entry::Unresolved(_) => BTreeSet::new(),
    }
  }

  /// The provider chosen for a rule entry's declared get.
  pub fn get_target(&self, id: EntryId, decl: GetDecl) -> Option<EntryId> {
    match &self.graph[id] {
      Entry::Rule(entry) => entry.gets.iter().find(|(d, _)| *d == decl).map(|(_, target)| *target),
      _ => None,
    }
  }

  /// Human-readable name of an entry, for errors and logs.
  pub fn describe(&self, id: EntryId) -> String {
    match &self.graph[id] {
      Entry::Param(ty) => format!("Param({ty})"),
      Entry::Rule(entry) => format!("{} -> {}", self.rules[entry.rule].name, entry.product),
      Entry::Unresolved(ty) => format!("<unresolved {ty}>"),
    }
  }

  pub fn rules(&self) -> &[Rule] {
    &self.rules
  }

  pub fn queries(&self) -> impl Iterator<Item = &Query> {
    self.queries.keys()
  }

  /// Number of resolved entries.
  pub fn entry_count(&self) -> usize {
    self
      .graph
      .node_weights()
      .filter(|e| !matches!(e, Entry::Unresolved(_)))
      .count()
  }

  /// Rules that no query can reach.
  pub fn unreachable_rules(&self) -> Vec<&Rule> {
    let used: HashSet<usize> = self
      .graph
      .node_weights()
      .filter_map(|e| match e {
        Entry::Rule(entry) => Some(entry.rule),
        _ => None,
      })
      .collect();
    self
      .rules
      .iter()
      .enumerate()
      .filter(|(i, _)| !used.contains(i))
      .map(|(_, rule)| rule)
      .collect()
  }

  /// Graphviz rendering of the resolved entries.
  pub fn to_dot(&self) -> String {
    let mut out = String::from("digraph rules {\n  rankdir=LR;\n");
    let mut queries: Vec<(&Query, &EntryId)> = self.queries.iter().collect();
    queries.sort_by_key(|(q, _)| q.to_string());
    for (i, (query, id)) in queries.iter().enumerate() {
      let _ = writeln!(out, "  q{i} [label=\"{query}\", shape=box];");
      let _ = writeln!(out, "  q{i} -> n{};", id.index());
    }
    for id in self.graph.node_indices() {
      if matches!(self.graph[id], Entry::Unresolved(_)) {
        continue;
      }
      let shape = if matches!(self.graph[id], Entry::Param(_)) {
        "ellipse"
      } else {
        "box, style=rounded"
      };
      let label = self.describe(id).replace('"', "\\\"");
      let _ = writeln!(out, "  n{} [label=\"{label}\", shape={shape}];", id.index());
      for edge in self.graph.edges_directed(id, Direction::Outgoing) {
        let style = match edge.weight() {
          Edge::Input => String::new(),
          Edge::Get(decl) => format!(" [style=dashed, label=\"{}\"]", decl.subject),
        };
        let _ = writeln!(out, "  n{} -> n{}{style};", id.index(), edge.target().index());
      }
    }
    out.push_str("}\n");
    out
  }
}

type ResolveKey = (TypeKey, BTreeSet<TypeKey>);

struct Resolver<'a> {
  rules: &'a [Rule],
  by_output: HashMap<TypeKey, Vec<usize>>,
  graph: DiGraph<Entry, Edge>,
  params: HashMap<TypeKey, EntryId>,
  memo: HashMap<ResolveKey, Result<EntryId, GraphError>>,
  /// Keys on the resolution stack, with their stack depth.
  in_progress: HashMap<ResolveKey, (EntryId, usize)>,
  /// Shallowest in-progress key the current frame has assumed satisfiable.
  low: usize,
}

impl<'a> Resolver<'a> {
  fn new(rules: &'a [Rule]) -> Self {
    let mut by_output: HashMap<TypeKey, Vec<usize>> = HashMap::new();
    for (i, rule) in rules.iter().enumerate() {
      by_output.entry(rule.output).or_default().push(i);
    }
    Self {
      rules,
      by_output,
      graph: DiGraph::new(),
      params: HashMap::new(),
      memo: HashMap::new(),
      in_progress: HashMap::new(),
      low: usize::MAX,
    }
  }

  /// Choose the single provider of `product` given `available` params.
  ///
  /// A param of the requested type is always used directly. Otherwise every
  /// rule producing the type is tried, and exactly one must be satisfiable.
  /// A pair that is already being resolved further up the stack is assumed
  /// satisfiable, which admits recursive rule sets. Results that rest on such
  /// an assumption are only memoized once the assumed pair has settled, so a
  /// pair that turns out unsatisfiable never leaks into a memoized entry.
  fn resolve(&mut self, product: TypeKey, available: &BTreeSet<TypeKey>) -> Result<EntryId, GraphError> {
    if available.contains(&product) {
      let graph = &mut self.graph;
      return Ok(*self.params.entry(product).or_insert_with(|| graph.add_node(Entry::Param(product))));
    }

    let key = (product, available.clone());
    if let Some(result) = self.memo.get(&key) {
      return result.clone();
    }
    if let Some((id, depth)) = self.in_progress.get(&key) {
      self.low = self.low.min(*depth);
      return Ok(*id);
    }

    let depth = self.in_progress.len();
    let id = self.graph.add_node(Entry::Unresolved(product));
    self.in_progress.insert(key.clone(), (id, depth));
    let outer_low = std::mem::replace(&mut self.low, usize::MAX);

    let candidates = self.by_output.get(&product).cloned().unwrap_or_default();
    let mut satisfied = Vec::new();
    let mut reasons = Vec::new();
    let mut fatal = None;
    for index in candidates {
      match self.resolve_rule(index, product, available) {
        Ok(entry) => satisfied.push(entry),
        Err(e @ GraphError::Ambiguous { .. }) => {
          fatal = Some(e);
          break;
        }
        Err(e) => reasons.push(format!("{} is not applicable because {e}", self.rules[index].name)),
      }
    }
    self.in_progress.remove(&key);

    let result = if let Some(e) = fatal {
      Err(e)
    } else if satisfied.len() > 1 {
      Err(GraphError::Ambiguous {
        product: product.to_string(),
        params: format_types(available),
        candidates: satisfied.iter().map(|e| self.rules[e.rule].name.clone()).collect(),
      })
    } else if let Some(entry) = satisfied.pop() {
      for (_, input) in &entry.inputs {
        self.graph.add_edge(id, *input, Edge::Input);
      }
      for (decl, target) in &entry.gets {
        self.graph.add_edge(id, *target, Edge::Get(*decl));
      }
      self.graph[id] = Entry::Rule(entry);
      Ok(id)
    } else {
      Err(GraphError::NoApplicableRule {
        product: product.to_string(),
        params: format_types(available),
        reasons,
      })
    };

    if self.low >= depth {
      self.memo.insert(key, result.clone());
      self.low = outer_low;
    } else {
      self.low = outer_low.min(self.low);
    }
    result
  }

  fn resolve_rule(
    &mut self,
    index: usize,
    product: TypeKey,
    available: &BTreeSet<TypeKey>,
  ) -> Result<RuleEntry, GraphError> {
    let rules = self.rules;
    let rule = &rules[index];

    let mut inputs = Vec::with_capacity(rule.inputs.len());
    for input in &rule.inputs {
      inputs.push((*input, self.resolve(*input, available)?));
    }

    // A get is computed fresh for its subject, so a param of the product
    // type must not shadow it.
    let mut gets = Vec::with_capacity(rule.gets.len());
    for decl in &rule.gets {
      let mut scope = available.clone();
      scope.remove(&decl.product);
      scope.insert(decl.subject);
      gets.push((*decl, self.resolve(decl.product, &scope)?));
    }

    Ok(RuleEntry {
      rule: index,
      product,
      inputs,
      gets,
      used_params: BTreeSet::new(),
    })
  }
}

/// Drop entries no query reaches, such as those built for candidates that
/// were later rejected, and renumber the rest.
fn retain_reachable(
  graph: DiGraph<Entry, Edge>,
  roots: HashMap<Query, EntryId>,
) -> (DiGraph<Entry, Edge>, HashMap<Query, EntryId>) {
  let mut reachable = HashSet::new();
  let mut stack: Vec<EntryId> = roots.values().copied().collect();
  while let Some(id) = stack.pop() {
    if reachable.insert(id) {
      stack.extend(graph.neighbors_directed(id, Direction::Outgoing));
    }
  }

  let mut renumbered = HashMap::new();
  for id in graph.node_indices().filter(|id| reachable.contains(id)) {
    renumbered.insert(id, NodeIndex::new(renumbered.len()));
  }

  let pruned = graph.filter_map(
    |id, entry| {
      if !reachable.contains(&id) {
        return None;
      }
      let mut entry = entry.clone();
      if let Entry::Rule(rule_entry) = &mut entry {
        for (_, input) in &mut rule_entry.inputs {
          *input = renumbered[&*input];
        }
        for (_, target) in &mut rule_entry.gets {
          *target = renumbered[&*target];
        }
      }
      Some(entry)
    },
    |_, edge| Some(*edge),
  );
  let roots = roots.into_iter().map(|(query, id)| (query, renumbered[&id])).collect();
  (pruned, roots)
}

/// The product of the first unresolved entry reachable from `root`.
fn first_unresolved(graph: &DiGraph<Entry, Edge>, root: EntryId) -> Option<TypeKey> {
  let mut seen = HashSet::new();
  let mut stack = vec![root];
  while let Some(id) = stack.pop() {
    if !seen.insert(id) {
      continue;
    }
    if let Entry::Unresolved(product) = &graph[id] {
      return Some(*product);
    }
    stack.extend(graph.neighbors_directed(id, Direction::Outgoing));
  }
  None
}

/// Fixpoint of the params each entry consumes.
///
/// A rule uses what its inputs use, plus what its gets use apart from the
/// subject the get itself supplies.
fn compute_used_params(graph: &mut DiGraph<Entry, Edge>) {
  let used_by = |graph: &DiGraph<Entry, Edge>, id: EntryId| -> BTreeSet<TypeKey> {
    match &graph[id] {
      Entry::Param(ty) => BTreeSet::from([*ty]),
      Entry::Rule(entry) => entry.used_params.clone(),
      Entry::Unresolved(_) => BTreeSet::new(),
    }
  };

  loop {
    let mut changed = false;
    for id in graph.node_indices() {
      let Entry::Rule(entry) = &graph[id] else {
        continue;
      };
      let mut used = BTreeSet::new();
      for (_, input) in &entry.inputs {
        used.extend(used_by(graph, *input));
      }
      for (decl, target) in &entry.gets {
        used.extend(used_by(graph, *target).into_iter().filter(|t| *t != decl.subject));
      }
      if used != entry.used_params
        && let Entry::Rule(entry) = &mut graph[id]
      {
        entry.used_params = used;
        changed = true;
      }
    }
    if !changed {
      break;
    }
  }
}
