//! Header to library resolution.

use super::{ImportedLibraries, Library};
use std::collections::HashMap;
use std::fs;

const HEADER_EXTENSIONS: [&str; 3] = ["h", "hpp", "hh"];

/// Outcome of looking up a header.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    NotFound,
    Found(&'a Library),
    /// Several libraries qualify; `chosen` is used and the caller warns.
    Ambiguous {
        chosen: &'a Library,
        candidates: Vec<&'a Library>,
    },
}

impl<'a> Resolution<'a> {
    pub fn library(&self) -> Option<&'a Library> {
        match self {
            Self::NotFound => None,
            Self::Found(lib) => Some(*lib),
            Self::Ambiguous { chosen, .. } => Some(*chosen),
        }
    }
}

/// Index from header file name to the libraries that provide it, in catalog
/// order.
pub struct LibraryResolver<'a> {
    headers: HashMap<String, Vec<&'a Library>>,
    arch: String,
}

impl<'a> LibraryResolver<'a> {
    /// Index the top-level headers of each library's source folder.
    pub fn new(libraries: &'a [Library], arch: &str) -> Self {
        let mut headers: HashMap<String, Vec<&'a Library>> = HashMap::new();
        for library in libraries {
            let Ok(entries) = fs::read_dir(&library.src_folder) else {
                tracing::debug!("cannot read {}", library.src_folder.display());
                continue;
            };
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
                .map(|e| e.path())
                .filter(|p| {
                    p.extension()
                        .and_then(|x| x.to_str())
                        .is_some_and(|x| HEADER_EXTENSIONS.contains(&x))
                })
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
                .collect();
            names.sort();
            for name in names {
                headers.entry(name).or_default().push(library);
            }
        }
        Self {
            headers,
            arch: arch.to_string(),
        }
    }

    pub fn candidates(&self, header: &str) -> &[&'a Library] {
        self.headers.get(header).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pick the library providing `header`.
    ///
    /// A library that is already imported always wins. Otherwise the
    /// candidates are narrowed to those supporting the target architecture;
    /// if that leaves more than one, the first is chosen and the result is
    /// [`Resolution::Ambiguous`].
    pub fn resolve(&self, header: &str, imported: &ImportedLibraries<'a>) -> Resolution<'a> {
        let candidates = self.candidates(header);
        match candidates {
            [] => return Resolution::NotFound,
            [only] => return Resolution::Found(*only),
            _ => {}
        }

        if let Some(lib) = candidates.iter().find(|l| imported.contains(l)) {
            return Resolution::Found(*lib);
        }

        let eligible: Vec<&'a Library> = candidates
            .iter()
            .copied()
            .filter(|l| l.supports_architecture(&self.arch))
            .collect();
        if let [only] = eligible.as_slice() {
            return Resolution::Found(*only);
        }

        let chosen = eligible.first().copied().unwrap_or(candidates[0]);
        tracing::debug!(
            "{} is provided by {} libraries, choosing {}",
            header,
            candidates.len(),
            chosen.name
        );
        Resolution::Ambiguous {
            chosen,
            candidates: candidates.to_vec(),
        }
    }
}
