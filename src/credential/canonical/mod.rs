//! JSON-LD Canonicalization
//!
//! Converts credential documents to RDF and normalizes them with URDNA2015 so
//! that the signed bytes depend only on the document's meaning, not on key
//! order or whitespace.
//!
//! Context documents are never fetched. The terms of the two contexts used by
//! vehicle credentials are built in:
//!
//! - `https://www.w3.org/2018/credentials/v1`, including the type-scoped
//!   terms of `VerifiableCredential` and `EcdsaSecp256k1Signature2019`
//! - `https://schema.org/`, as a vocabulary mapping (`@vocab`)
//!
//! Any other context, inline context or undefined term is rejected instead
//! of being silently dropped from the signed statements.

use serde_json::{Map, Value};
use thiserror::Error;

mod urdna2015;

pub use urdna2015::normalize;

pub const CREDENTIALS_V1_CONTEXT: &str = "https://www.w3.org/2018/credentials/v1";
pub const SCHEMA_ORG_CONTEXT: &str = "https://schema.org/";

const SCHEMA_ORG_ALIASES: &[&str] = &[
    "https://schema.org/",
    "https://schema.org",
    "http://schema.org/",
    "http://schema.org",
];

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
const XSD_DATETIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
const CRED: &str = "https://www.w3.org/2018/credentials#";
const SEC: &str = "https://w3id.org/security#";
const SCHEMA: &str = "http://schema.org/";
const DC_CREATED: &str = "http://purl.org/dc/terms/created";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("unsupported JSON-LD context: {0}")]
    UnsupportedContext(String),
    #[error("term '{0}' is not defined by the active context")]
    UndefinedTerm(String),
    #[error("invalid value for '{term}': {reason}")]
    InvalidValue { term: String, reason: String },
}

fn invalid(term: &str, reason: impl Into<String>) -> CanonicalError {
    CanonicalError::InvalidValue {
        term: term.to_string(),
        reason: reason.into(),
    }
}

// ============================================================================
// RDF DATA MODEL
// ============================================================================

/// An RDF term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Iri(String),
    /// Blank node identifier without the `_:` prefix
    Blank(String),
    Literal { value: String, datatype: String },
}

impl Term {
    fn blank_id(&self) -> Option<&str> {
        match self {
            Term::Blank(id) => Some(id),
            _ => None,
        }
    }

    fn write(&self, out: &mut String, label: &dyn Fn(&str) -> String) {
        match self {
            Term::Iri(iri) => {
                out.push('<');
                out.push_str(iri);
                out.push('>');
            }
            Term::Blank(id) => {
                out.push_str("_:");
                out.push_str(&label(id));
            }
            Term::Literal { value, datatype } => {
                out.push('"');
                for c in value.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        other => out.push(other),
                    }
                }
                out.push('"');
                if datatype != XSD_STRING {
                    out.push_str("^^<");
                    out.push_str(datatype);
                    out.push('>');
                }
            }
        }
    }
}

/// An RDF statement; `graph` is `None` for the default graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quad {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
    pub graph: Option<Term>,
}

impl Quad {
    /// Serializes the quad as one N-Quads line (with trailing newline),
    /// naming blank nodes through `label`.
    pub fn to_nquad_with(&self, label: &dyn Fn(&str) -> String) -> String {
        let mut out = String::new();
        self.subject.write(&mut out, label);
        out.push_str(" <");
        out.push_str(&self.predicate);
        out.push_str("> ");
        self.object.write(&mut out, label);
        if let Some(graph) = &self.graph {
            out.push(' ');
            graph.write(&mut out, label);
        }
        out.push_str(" .\n");
        out
    }

    /// Blank node identifiers used by this quad, in s/o/g order.
    fn blank_nodes(&self) -> impl Iterator<Item = &str> {
        [
            self.subject.blank_id(),
            self.object.blank_id(),
            self.graph.as_ref().and_then(Term::blank_id),
        ]
        .into_iter()
        .flatten()
    }
}

// ============================================================================
// STATIC CONTEXTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// Type-scoped terms of `VerifiableCredential`
    Credential,
    /// Type-scoped terms of `EcdsaSecp256k1Signature2019`
    Ecdsa,
    /// Property-scoped terms of `proofPurpose`
    ProofPurpose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coercion {
    None,
    Id,
    Vocab,
    DateTime,
    Graph,
}

#[derive(Debug, Clone)]
struct TermDef {
    iri: String,
    coercion: Coercion,
    property_scope: Option<Scope>,
}

fn def(iri: String, coercion: Coercion) -> TermDef {
    TermDef {
        iri,
        coercion,
        property_scope: None,
    }
}

fn cred(name: &str) -> String {
    format!("{}{}", CRED, name)
}

fn sec(name: &str) -> String {
    format!("{}{}", SEC, name)
}

fn scoped_term(scope: Scope, key: &str) -> Option<TermDef> {
    use Coercion::*;
    let found = match (scope, key) {
        (Scope::Credential, "credentialSchema")
        | (Scope::Credential, "credentialStatus")
        | (Scope::Credential, "credentialSubject")
        | (Scope::Credential, "evidence")
        | (Scope::Credential, "holder")
        | (Scope::Credential, "issuer")
        | (Scope::Credential, "refreshService")
        | (Scope::Credential, "termsOfUse") => def(cred(key), Id),
        (Scope::Credential, "expirationDate")
        | (Scope::Credential, "issued")
        | (Scope::Credential, "issuanceDate")
        | (Scope::Credential, "validFrom")
        | (Scope::Credential, "validUntil") => def(cred(key), DateTime),
        (Scope::Credential, "proof") => def(sec("proof"), Graph),

        (Scope::Ecdsa, "challenge")
        | (Scope::Ecdsa, "domain")
        | (Scope::Ecdsa, "jws")
        | (Scope::Ecdsa, "nonce")
        | (Scope::Ecdsa, "proofValue") => def(sec(key), None),
        (Scope::Ecdsa, "created") => def(DC_CREATED.to_string(), DateTime),
        (Scope::Ecdsa, "expires") => def(sec("expiration"), DateTime),
        (Scope::Ecdsa, "verificationMethod") => def(sec(key), Id),
        (Scope::Ecdsa, "proofPurpose") => TermDef {
            iri: sec(key),
            coercion: Vocab,
            property_scope: Some(Scope::ProofPurpose),
        },

        (Scope::ProofPurpose, "assertionMethod") => def(sec("assertionMethod"), Id),
        (Scope::ProofPurpose, "authentication") => def(sec("authenticationMethod"), Id),
        (Scope::ProofPurpose, "capabilityInvocation") => {
            def(sec("capabilityInvocationMethod"), Id)
        }
        (Scope::ProofPurpose, "capabilityDelegation") => {
            def(sec("capabilityDelegationMethod"), Id)
        }
        (Scope::ProofPurpose, "keyAgreement") => def(sec("keyAgreementMethod"), Id),
        _ => return Option::None,
    };
    Some(found)
}

fn scope_prefix(scope: Scope, prefix: &str) -> Option<&'static str> {
    match (scope, prefix) {
        (Scope::Credential, "cred") => Some(CRED),
        (Scope::Credential | Scope::Ecdsa | Scope::ProofPurpose, "sec") => Some(SEC),
        (Scope::Credential | Scope::Ecdsa, "xsd") => Some(XSD),
        _ => None,
    }
}

/// Types defined by the credentials context and the scope they activate.
fn credential_type(name: &str) -> Option<(String, Option<Scope>)> {
    match name {
        "VerifiableCredential" => Some((cred(name), Some(Scope::Credential))),
        "VerifiablePresentation" => Some((cred(name), None)),
        "EcdsaSecp256k1Signature2019" => Some((sec(name), Some(Scope::Ecdsa))),
        "EcdsaSecp256r1Signature2019" | "Ed25519Signature2018" | "RsaSignature2018" => {
            Some((sec(name), None))
        }
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct ActiveContext {
    credentials: bool,
    schema: bool,
    scopes: Vec<Scope>,
}

impl ActiveContext {
    fn from_document(context: Option<&Value>) -> Result<Self, CanonicalError> {
        let mut ctx = ActiveContext {
            credentials: false,
            schema: false,
            scopes: Vec::new(),
        };

        let entries: Vec<&Value> = match context {
            None => Vec::new(),
            Some(Value::Array(items)) => items.iter().collect(),
            Some(other) => vec![other],
        };

        for entry in entries {
            match entry.as_str() {
                Some(CREDENTIALS_V1_CONTEXT) => ctx.credentials = true,
                Some(url) if SCHEMA_ORG_ALIASES.contains(&url) => ctx.schema = true,
                Some(url) => return Err(CanonicalError::UnsupportedContext(url.to_string())),
                None => {
                    return Err(CanonicalError::UnsupportedContext(
                        "inline context definitions".to_string(),
                    ))
                }
            }
        }
        Ok(ctx)
    }

    fn with_scope(&self, scope: Scope) -> Self {
        let mut next = self.clone();
        next.scopes.push(scope);
        next
    }

    fn is_id_key(&self, key: &str) -> bool {
        key == "@id" || (key == "id" && (self.credentials || self.schema))
    }

    fn is_type_key(&self, key: &str) -> bool {
        key == "@type" || (key == "type" && (self.credentials || self.schema))
    }

    /// Expands `prefix:suffix` or returns absolute IRIs unchanged.
    fn expand_iri(&self, value: &str) -> Option<String> {
        let (prefix, suffix) = value.split_once(':')?;
        if suffix.starts_with("//") {
            return Some(value.to_string());
        }
        for scope in self.scopes.iter().rev() {
            if let Some(base) = scope_prefix(*scope, prefix) {
                return Some(format!("{}{}", base, suffix));
            }
        }
        if self.schema && prefix == "schema" {
            return Some(format!("{}{}", SCHEMA, suffix));
        }
        Some(value.to_string())
    }

    fn term(&self, key: &str) -> Result<TermDef, CanonicalError> {
        for scope in self.scopes.iter().rev() {
            if let Some(found) = scoped_term(*scope, key) {
                return Ok(found);
            }
        }
        if self.credentials && key == "proof" {
            return Ok(def(sec("proof"), Coercion::Graph));
        }
        if let Some(iri) = self.expand_iri(key) {
            return Ok(def(iri, Coercion::None));
        }
        if self.schema {
            return Ok(def(format!("{}{}", SCHEMA, key), Coercion::None));
        }
        Err(CanonicalError::UndefinedTerm(key.to_string()))
    }

    fn type_iri(&self, name: &str) -> Result<(String, Option<Scope>), CanonicalError> {
        if self.credentials {
            if let Some(found) = credential_type(name) {
                return Ok(found);
            }
        }
        if let Some(iri) = self.expand_iri(name) {
            return Ok((iri, None));
        }
        if self.schema {
            return Ok((format!("{}{}", SCHEMA, name), None));
        }
        Err(CanonicalError::UndefinedTerm(name.to_string()))
    }

    /// Expands a string value of a `@vocab`-typed term.
    fn vocab_iri(&self, value: &str) -> Result<String, CanonicalError> {
        for scope in self.scopes.iter().rev() {
            if let Some(found) = scoped_term(*scope, value) {
                return Ok(found.iri);
            }
        }
        Ok(self.type_iri(value)?.0)
    }
}

fn check_absolute_iri(term: &str, value: &str) -> Result<String, CanonicalError> {
    let well_formed = value.contains(':')
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '"' | '{' | '}'));
    if !well_formed {
        return Err(invalid(term, format!("'{}' is not an absolute IRI", value)));
    }
    Ok(value.to_string())
}

// ============================================================================
// JSON-LD TO RDF
// ============================================================================

#[derive(Default)]
struct Converter {
    quads: Vec<Quad>,
    next_blank: usize,
}

impl Converter {
    fn fresh_blank(&mut self) -> Term {
        let id = format!("b{}", self.next_blank);
        self.next_blank += 1;
        Term::Blank(id)
    }

    fn node(
        &mut self,
        object: &Map<String, Value>,
        ctx: &ActiveContext,
        graph: &Option<Term>,
    ) -> Result<Term, CanonicalError> {
        if object.contains_key("@context") {
            return Err(CanonicalError::UnsupportedContext(
                "embedded @context".to_string(),
            ));
        }
        for keyword in ["@value", "@list", "@set", "@language", "@graph"] {
            if object.contains_key(keyword) {
                return Err(invalid(keyword, "keyword is not supported"));
            }
        }

        let mut subject = None;
        let mut types = Vec::new();
        for (key, value) in object {
            if ctx.is_id_key(key) {
                let id = value
                    .as_str()
                    .ok_or_else(|| invalid(key, "node identifier must be a string"))?;
                subject = Some(Term::Iri(check_absolute_iri(key, id)?));
            } else if ctx.is_type_key(key) {
                match value {
                    Value::String(name) => types.push(name.clone()),
                    Value::Array(names) => {
                        for name in names {
                            let name = name
                                .as_str()
                                .ok_or_else(|| invalid(key, "types must be strings"))?;
                            types.push(name.to_string());
                        }
                    }
                    _ => return Err(invalid(key, "types must be strings")),
                }
            }
        }
        let subject = match subject {
            Some(subject) => subject,
            None => self.fresh_blank(),
        };

        // Type-scoped contexts apply in lexicographical order of the type terms.
        types.sort();
        let mut node_ctx = ctx.clone();
        for name in &types {
            let (iri, scope) = ctx.type_iri(name)?;
            self.quads.push(Quad {
                subject: subject.clone(),
                predicate: RDF_TYPE.to_string(),
                object: Term::Iri(iri),
                graph: graph.clone(),
            });
            if let Some(scope) = scope {
                node_ctx = node_ctx.with_scope(scope);
            }
        }

        for (key, value) in object {
            if ctx.is_id_key(key) || ctx.is_type_key(key) {
                continue;
            }
            if key.starts_with('@') {
                return Err(invalid(key, "keyword is not supported"));
            }

            let term = node_ctx.term(key)?;
            // Type-scoped terms do not propagate into nested nodes.
            let value_ctx = match term.property_scope {
                Some(scope) => ctx.with_scope(scope),
                None => ctx.clone(),
            };

            let mut items = Vec::new();
            flatten(value, &mut items);
            for item in items {
                if term.coercion == Coercion::Graph {
                    let nested = item
                        .as_object()
                        .ok_or_else(|| invalid(key, "graph container value must be an object"))?;
                    let graph_name = self.fresh_blank();
                    self.node(nested, &value_ctx, &Some(graph_name.clone()))?;
                    self.quads.push(Quad {
                        subject: subject.clone(),
                        predicate: term.iri.clone(),
                        object: graph_name,
                        graph: graph.clone(),
                    });
                    continue;
                }

                let object = self.value(key, &term, item, &value_ctx, graph)?;
                self.quads.push(Quad {
                    subject: subject.clone(),
                    predicate: term.iri.clone(),
                    object,
                    graph: graph.clone(),
                });
            }
        }

        Ok(subject)
    }

    fn value(
        &mut self,
        key: &str,
        term: &TermDef,
        value: &Value,
        ctx: &ActiveContext,
        graph: &Option<Term>,
    ) -> Result<Term, CanonicalError> {
        match (value, term.coercion) {
            (Value::Object(object), _) => self.node(object, ctx, graph),
            (Value::String(s), Coercion::Id) => Ok(Term::Iri(check_absolute_iri(key, s)?)),
            (Value::String(s), Coercion::Vocab) => {
                Ok(Term::Iri(check_absolute_iri(key, &ctx.vocab_iri(s)?)?))
            }
            (Value::String(s), Coercion::DateTime) => Ok(Term::Literal {
                value: s.clone(),
                datatype: XSD_DATETIME.to_string(),
            }),
            (Value::String(s), _) => Ok(Term::Literal {
                value: s.clone(),
                datatype: XSD_STRING.to_string(),
            }),
            (Value::Bool(b), Coercion::None) => Ok(Term::Literal {
                value: b.to_string(),
                datatype: XSD_BOOLEAN.to_string(),
            }),
            (Value::Number(n), Coercion::None) if n.is_i64() || n.is_u64() => Ok(Term::Literal {
                value: n.to_string(),
                datatype: XSD_INTEGER.to_string(),
            }),
            (Value::Number(_), Coercion::None) => {
                Err(invalid(key, "non-integer numbers are not supported"))
            }
            _ => Err(invalid(key, "value does not match the term definition")),
        }
    }
}

fn flatten<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten(item, out);
            }
        }
        Value::Null => {}
        other => out.push(other),
    }
}

/// Converts a JSON-LD document to RDF quads.
pub fn to_rdf(document: &Value) -> Result<Vec<Quad>, CanonicalError> {
    let object = document
        .as_object()
        .ok_or_else(|| invalid("@context", "document must be a JSON object"))?;

    let ctx = ActiveContext::from_document(object.get("@context"))?;
    let mut body = object.clone();
    body.remove("@context");

    let mut converter = Converter::default();
    converter.node(&body, &ctx, &None)?;
    Ok(converter.quads)
}

/// Canonical N-Quads of a JSON-LD document (URDNA2015).
pub fn canonicalize(document: &Value) -> Result<String, CanonicalError> {
    Ok(normalize(&to_rdf(document)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_change_canonical_form() {
        let a = json!({
            "@context": [CREDENTIALS_V1_CONTEXT, SCHEMA_ORG_CONTEXT],
            "type": ["VerifiableCredential", "Vehicle"],
            "id": "urn:uuid:1",
            "issuer": "did:ethr:137:0x1",
            "credentialSubject": { "id": "did:nft:1", "vehicleIdentificationNumber": "1G6AL1RY2K0111939" }
        });
        let b = json!({
            "credentialSubject": { "vehicleIdentificationNumber": "1G6AL1RY2K0111939", "id": "did:nft:1" },
            "issuer": "did:ethr:137:0x1",
            "id": "urn:uuid:1",
            "type": ["Vehicle", "VerifiableCredential"],
            "@context": [CREDENTIALS_V1_CONTEXT, SCHEMA_ORG_CONTEXT]
        });
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    #[test]
    fn test_type_scoped_terms() {
        let doc = json!({
            "@context": [CREDENTIALS_V1_CONTEXT],
            "type": "EcdsaSecp256k1Signature2019",
            "created": "2022-01-31T05:00:00Z",
            "proofPurpose": "assertionMethod",
            "verificationMethod": "did:ethr:137:0xabc#controller"
        });
        let nquads = canonicalize(&doc).unwrap();
        assert!(nquads.contains(
            "_:c14n0 <https://w3id.org/security#proofPurpose> <https://w3id.org/security#assertionMethod> ."
        ));
        assert!(nquads.contains(
            "_:c14n0 <http://purl.org/dc/terms/created> \"2022-01-31T05:00:00Z\"^^<http://www.w3.org/2001/XMLSchema#dateTime> ."
        ));
        assert!(nquads.contains(
            "_:c14n0 <https://w3id.org/security#verificationMethod> <did:ethr:137:0xabc#controller> ."
        ));
    }

    #[test]
    fn test_rejects_unknown_context_and_terms() {
        let unknown_context = json!({ "@context": "https://example.com/ctx", "id": "urn:x" });
        assert!(matches!(
            canonicalize(&unknown_context),
            Err(CanonicalError::UnsupportedContext(_))
        ));

        let undefined = json!({ "@context": [CREDENTIALS_V1_CONTEXT], "colour": "red" });
        assert_eq!(
            canonicalize(&undefined),
            Err(CanonicalError::UndefinedTerm("colour".to_string()))
        );
    }
}
