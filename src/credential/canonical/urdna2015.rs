//! URDNA2015 RDF dataset normalization.
//!
//! Assigns deterministic `c14n<N>` labels to blank nodes and returns the
//! dataset as sorted N-Quads.

use std::collections::{BTreeMap, HashMap};

use sha2::{Digest, Sha256};

use super::Quad;

fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Issues sequential identifiers and remembers the order of issuance.
#[derive(Debug, Clone)]
struct IdentifierIssuer {
    prefix: &'static str,
    counter: usize,
    issued: HashMap<String, String>,
    order: Vec<String>,
}

impl IdentifierIssuer {
    fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            counter: 0,
            issued: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn issue(&mut self, existing: &str) -> String {
        if let Some(id) = self.issued.get(existing) {
            return id.clone();
        }
        let id = format!("{}{}", self.prefix, self.counter);
        self.counter += 1;
        self.issued.insert(existing.to_string(), id.clone());
        self.order.push(existing.to_string());
        id
    }

    fn get(&self, existing: &str) -> Option<&String> {
        self.issued.get(existing)
    }
}

struct Canonicalizer<'a> {
    quads: &'a [Quad],
    /// Blank node id -> indices of the quads mentioning it
    blank_quads: HashMap<String, Vec<usize>>,
    canonical: IdentifierIssuer,
    first_degree: HashMap<String, String>,
}

impl<'a> Canonicalizer<'a> {
    fn new(quads: &'a [Quad]) -> Self {
        let mut blank_quads: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, quad) in quads.iter().enumerate() {
            for id in quad.blank_nodes() {
                let entry = blank_quads.entry(id.to_string()).or_default();
                if entry.last() != Some(&index) {
                    entry.push(index);
                }
            }
        }
        Self {
            quads,
            blank_quads,
            canonical: IdentifierIssuer::new("c14n"),
            first_degree: HashMap::new(),
        }
    }

    fn hash_first_degree(&mut self, id: &str) -> String {
        if let Some(hash) = self.first_degree.get(id) {
            return hash.clone();
        }

        let mut lines: Vec<String> = self
            .blank_quads
            .get(id)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| {
                        self.quads[i].to_nquad_with(&|b: &str| {
                            if b == id { "a".to_string() } else { "z".to_string() }
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        lines.sort();

        let hash = sha256_hex(&lines.concat());
        self.first_degree.insert(id.to_string(), hash.clone());
        hash
    }

    fn hash_related(
        &mut self,
        related: &str,
        quad: &Quad,
        issuer: &IdentifierIssuer,
        position: char,
    ) -> String {
        let known = self
            .canonical
            .get(related)
            .or_else(|| issuer.get(related))
            .cloned();
        let identifier = match known {
            Some(id) => format!("_:{}", id),
            None => self.hash_first_degree(related),
        };

        let mut input = String::new();
        input.push(position);
        if position != 'g' {
            input.push('<');
            input.push_str(&quad.predicate);
            input.push('>');
        }
        input.push_str(&identifier);
        sha256_hex(&input)
    }

    fn hash_n_degree(&mut self, id: &str, issuer: IdentifierIssuer) -> (String, IdentifierIssuer) {
        let mut issuer = issuer;
        let mut related_by_hash: BTreeMap<String, Vec<String>> = BTreeMap::new();

        let quads = self.quads;
        let indices = self.blank_quads.get(id).cloned().unwrap_or_default();
        for index in indices {
            let quad = &quads[index];
            let positions = [
                ('s', quad.subject.blank_id()),
                ('o', quad.object.blank_id()),
                ('g', quad.graph.as_ref().and_then(|g| g.blank_id())),
            ];
            for (position, component) in positions {
                if let Some(related) = component {
                    if related != id {
                        let hash = self.hash_related(related, quad, &issuer, position);
                        related_by_hash
                            .entry(hash)
                            .or_default()
                            .push(related.to_string());
                    }
                }
            }
        }

        let mut data_to_hash = String::new();
        for (related_hash, blank_nodes) in related_by_hash {
            data_to_hash.push_str(&related_hash);

            let mut chosen_path = String::new();
            let mut chosen_issuer: Option<IdentifierIssuer> = None;

            'permutations: for permutation in permutations(&blank_nodes) {
                let mut issuer_copy = issuer.clone();
                let mut path = String::new();
                let mut recursion = Vec::new();

                for related in &permutation {
                    if let Some(canonical) = self.canonical.get(related) {
                        path.push_str("_:");
                        path.push_str(canonical);
                    } else {
                        if issuer_copy.get(related).is_none() {
                            recursion.push(related.clone());
                        }
                        path.push_str("_:");
                        path.push_str(&issuer_copy.issue(related));
                    }
                    if exceeds(&path, &chosen_path) {
                        continue 'permutations;
                    }
                }

                for related in recursion {
                    let (hash, next_issuer) = self.hash_n_degree(&related, issuer_copy.clone());
                    issuer_copy = next_issuer;
                    path.push_str("_:");
                    path.push_str(&issuer_copy.issue(&related));
                    path.push('<');
                    path.push_str(&hash);
                    path.push('>');
                    if exceeds(&path, &chosen_path) {
                        continue 'permutations;
                    }
                }

                if chosen_path.is_empty() || path < chosen_path {
                    chosen_path = path;
                    chosen_issuer = Some(issuer_copy);
                }
            }

            data_to_hash.push_str(&chosen_path);
            if let Some(chosen) = chosen_issuer {
                issuer = chosen;
            }
        }

        (sha256_hex(&data_to_hash), issuer)
    }

    fn run(mut self) -> String {
        let mut ids: Vec<String> = self.blank_quads.keys().cloned().collect();
        ids.sort();

        let mut by_hash: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for id in &ids {
            let hash = self.hash_first_degree(id);
            by_hash.entry(hash).or_default().push(id.clone());
        }

        // Unique first-degree hashes get their canonical label directly.
        let mut shared = Vec::new();
        for (hash, nodes) in by_hash {
            if nodes.len() == 1 {
                self.canonical.issue(&nodes[0]);
            } else {
                shared.push((hash, nodes));
            }
        }

        for (_, nodes) in shared {
            let mut results = Vec::new();
            for id in nodes {
                if self.canonical.get(&id).is_some() {
                    continue;
                }
                let mut temporary = IdentifierIssuer::new("b");
                temporary.issue(&id);
                results.push(self.hash_n_degree(&id, temporary));
            }
            results.sort_by(|a, b| a.0.cmp(&b.0));
            for (_, issuer) in results {
                for existing in &issuer.order {
                    self.canonical.issue(existing);
                }
            }
        }

        let canonical = &self.canonical;
        let mut lines: Vec<String> = self
            .quads
            .iter()
            .map(|quad| {
                quad.to_nquad_with(&|b: &str| {
                    canonical.get(b).cloned().unwrap_or_else(|| b.to_string())
                })
            })
            .collect();
        lines.sort();
        lines.dedup();
        lines.concat()
    }
}

fn exceeds(path: &str, chosen: &str) -> bool {
    !chosen.is_empty() && path.len() >= chosen.len() && path > chosen
}

fn permutations(items: &[String]) -> Vec<Vec<String>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            out.push(tail);
        }
    }
    out
}

/// Normalizes a dataset and returns its canonical N-Quads document.
pub fn normalize(quads: &[Quad]) -> String {
    Canonicalizer::new(quads).run()
}
