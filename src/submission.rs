//! Inbound data model: what the upload intake hands to the pipeline.
//!
//! A [`Submission`] is one document-submission event for one client. Every
//! [`SourceFile`] in it carries the category the user declared; the pipeline
//! groups files by that category and rebuilds one artifact per
//! [`ArtifactKey`].

use crate::error::AssemblyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Fixed set of document classifications. Each owns one canonical artifact
/// per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Identity documents (ID card, proof of address, …).
    PersonalDocuments,
    /// Bank statements.
    BankStatement,
    /// Documents of the client's dependents.
    DependentDocuments,
    /// Documents of the client's spouse.
    SpouseDocuments,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::PersonalDocuments,
        Category::BankStatement,
        Category::DependentDocuments,
        Category::SpouseDocuments,
    ];

    /// Directory name used under `<root>/<owner>/<client>/`.
    pub fn slug(self) -> &'static str {
        match self {
            Category::PersonalDocuments => "documentos_pessoais",
            Category::BankStatement => "extrato_bancario",
            Category::DependentDocuments => "documentos_dependentes",
            Category::SpouseDocuments => "documentos_conjuge",
        }
    }

    /// File name of the canonical artifact inside the category directory.
    pub fn file_name(self) -> String {
        format!("{}.pdf", self.slug())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts the directory slug or the snake_case variant name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "documentos_pessoais" | "personal_documents" => Ok(Category::PersonalDocuments),
            "extrato_bancario" | "bank_statement" => Ok(Category::BankStatement),
            "documentos_dependentes" | "dependent_documents" => Ok(Category::DependentDocuments),
            "documentos_conjuge" | "spouse_documents" => Ok(Category::SpouseDocuments),
            other => Err(format!("unknown document category '{other}'")),
        }
    }
}

/// One uploaded file, as produced by the upload intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Where the intake stored the upload. Removed or quarantined by the
    /// pipeline once the category succeeds.
    pub temporary_path: PathBuf,
    pub declared_category: Category,
    /// Client-declared mime type. A hint only; content probing decides.
    pub mime_type: String,
    pub original_name: String,
}

impl SourceFile {
    pub fn new(
        temporary_path: impl Into<PathBuf>,
        declared_category: Category,
        mime_type: impl Into<String>,
        original_name: impl Into<String>,
    ) -> Self {
        Self {
            temporary_path: temporary_path.into(),
            declared_category,
            mime_type: mime_type.into(),
            original_name: original_name.into(),
        }
    }

    /// Whether the declared mime type claims a raster image.
    pub fn declares_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// One document-submission event for one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub owner: String,
    pub client_id: String,
    /// Files in upload order. Order is preserved into the artifact.
    pub files: Vec<SourceFile>,
}

impl Submission {
    pub fn new(owner: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            client_id: client_id.into(),
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, file: SourceFile) -> Self {
        self.files.push(file);
        self
    }

    /// Reject identifiers that could escape the upload root.
    pub fn validate(&self) -> Result<(), AssemblyError> {
        validate_segment("owner", &self.owner)?;
        validate_segment("client", &self.client_id)
    }

    /// Artifact key for one of this submission's categories.
    pub fn key(&self, category: Category) -> ArtifactKey {
        ArtifactKey {
            owner: self.owner.clone(),
            client_id: self.client_id.clone(),
            category,
        }
    }
}

/// Identity of one canonical artifact: `(owner, client, category)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub owner: String,
    pub client_id: String,
    pub category: Category,
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.client_id, self.category)
    }
}

pub(crate) fn validate_segment(field: &'static str, value: &str) -> Result<(), AssemblyError> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if bad {
        return Err(AssemblyError::InvalidIdentifier {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
