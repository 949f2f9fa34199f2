// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error results used by this library.

use thiserror::Error;

/// Where in a policy an error was raised, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diagnostic {
    pub policy: Option<String>,
    pub term: Option<String>,
    pub block: Option<&'static str>,
    pub line: Option<u32>,
}

impl Diagnostic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = Some(term.into());
        self
    }

    pub fn with_block(mut self, block: &'static str) -> Self {
        self.block = Some(block);
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(p) = &self.policy {
            write!(f, " policy={p}")?;
        }
        if let Some(t) = &self.term {
            write!(f, " term={t}")?;
        }
        if let Some(b) = &self.block {
            write!(f, " block={b}")?;
        }
        if let Some(l) = &self.line {
            write!(f, " line={l}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("unexpected end of statement")]
    UnexpectedEof,

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("invalid literal '{0}': {1}")]
    InvalidLiteral(String, String),

    #[error("invalid regex pattern '{0}': {1}")]
    InvalidRegex(String, String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SemanticError {
    #[error("type mismatch: operator '{op}' has no overload for {operands:?}")]
    TypeMismatch { op: String, operands: Vec<&'static str> },

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("attempted write to read-only variable id {0}")]
    ReadOnlyWrite(u32),

    #[error("import policy may not use a Proto match")]
    ProtoInImport,

    #[error("import policy may not use a non-empty dest-match block")]
    DestMatchInImport,

    #[error("export policy must set Proto in source-match before any non-trivial action")]
    MissingProtoInExport,

    #[error("unknown set '{0}'")]
    UnknownSet(String),

    #[error("unknown sub-policy '{0}'")]
    UnknownSubPolicy(String),

    #[error("cycle detected among sub-policies: {0:?}")]
    SubPolicyCycle(Vec<String>),
}

#[derive(Error, Debug, PartialEq)]
pub enum DependencyError {
    #[error("'{0}' is still referenced by {1} dependent(s)")]
    InUse(String, usize),

    #[error("'{0}' already exists")]
    AlreadyExists(String),

    #[error("'{0}' does not exist")]
    NotFound(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum RuntimeError {
    #[error("operand stack underflow evaluating instruction at offset {0}")]
    StackUnderflow(usize),

    #[error("runtime type mismatch at offset {0}")]
    TypeMismatch(usize),

    #[error("unknown variable id {0} at offset {1}")]
    UnknownVariable(u32, usize),
}

#[derive(Error, Debug, PartialEq)]
pub enum PolicyError {
    #[error("parse error:{diag} {source}")]
    Parse {
        #[source]
        source: ParseError,
        diag: Diagnostic,
    },

    #[error("semantic error:{diag} {source}")]
    Semantic {
        #[source]
        source: SemanticError,
        diag: Diagnostic,
    },

    #[error("dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error("redistribution tag counter overflowed (fatal)")]
    TagOverflow,

    #[error("runtime error:{diag} {source}")]
    Runtime {
        #[source]
        source: RuntimeError,
        diag: Diagnostic,
    },

    #[error("unknown policy '{0}'")]
    UnknownPolicy(String),

    #[error("unknown protocol '{0}'")]
    UnknownProtocol(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl PolicyError {
    pub fn parse(source: ParseError, diag: Diagnostic) -> Self {
        PolicyError::Parse { source, diag }
    }

    pub fn semantic(source: SemanticError, diag: Diagnostic) -> Self {
        PolicyError::Semantic { source, diag }
    }

    pub fn runtime(source: RuntimeError, diag: Diagnostic) -> Self {
        PolicyError::Runtime { source, diag }
    }
}
