//! The book catalogue served by the `books` query.
//!
//! Books are plain immutable records. A [`BookCatalog`] is built once at
//! startup (from the built-in sample or a JSON file) and handed to the schema
//! as read-only data.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_graphql::SimpleObject;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single book.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, SimpleObject)]
pub struct Book {
    pub title: String,
    pub author: String,
}

impl Book {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
        }
    }
}

/// Errors loading a catalogue from disk.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalogue {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalogue {path} is not a JSON array of books: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Read-only, cheaply cloneable list of books.
///
/// # Examples
///
/// ```
/// use bookshelf::books::BookCatalog;
///
/// let catalog = BookCatalog::sample();
/// assert_eq!(catalog.len(), 2);
/// assert_eq!(catalog.books()[0].author, "Kate Chopin");
/// ```
#[derive(Debug, Clone, Default)]
pub struct BookCatalog {
    books: Arc<[Book]>,
}

impl BookCatalog {
    pub fn new(books: Vec<Book>) -> Self {
        Self {
            books: books.into(),
        }
    }

    /// The two-book catalogue the server ships with.
    pub fn sample() -> Self {
        Self::new(vec![
            Book::new("The Awakening", "Kate Chopin"),
            Book::new("City of Glass", "Paul Auster"),
        ])
    }

    /// Loads a catalogue from a JSON file of the form
    /// `[{"title": "..", "author": ".."}, ..]`.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Read`] if the file cannot be read and
    /// [`CatalogError::Parse`] if it is not a JSON array of books.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| CatalogError::Read {
            path: path.to_owned(),
            source,
        })?;
        let books: Vec<Book> = serde_json::from_slice(&raw).map_err(|source| CatalogError::Parse {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self::new(books))
    }

    pub fn books(&self) -> &[Book] {
        &self.books
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}
