use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

const FILE_SCHEME: &str = "file://";

/// Opaque identifier of one still image: a filesystem path or a `file://` URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameDescriptor {
    id: String,
    index: u64,
}

impl FrameDescriptor {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Position of this frame in its source list, starting at zero.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Resolves the identifier to a local path.
    ///
    /// Plain identifiers are taken as paths. `file://` URIs are
    /// percent-decoded; an optional `localhost` authority is accepted.
    pub fn to_path(&self) -> Result<PathBuf, String> {
        let Some((scheme, _)) = self.id.split_once("://") else {
            return Ok(PathBuf::from(&self.id));
        };
        if !self.id.starts_with(FILE_SCHEME) {
            return Err(format!("unsupported URI scheme '{scheme}'"));
        }

        let rest = &self.id[FILE_SCHEME.len()..];
        let rest = rest.strip_prefix("localhost").unwrap_or(rest);
        if !rest.starts_with('/') {
            return Err(format!("file URI has a remote host: {}", self.id));
        }

        let decoded = urlencoding::decode(rest)
            .map_err(|e| format!("invalid percent-encoding in {}: {e}", self.id))?;
        Ok(PathBuf::from(decoded.into_owned()))
    }
}

impl fmt::Display for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Ordered, immutable list of frame identifiers for one build.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameSourceList {
    ids: Vec<String>,
}

impl FrameSourceList {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn first(&self) -> Option<FrameDescriptor> {
        self.ids.first().map(|id| FrameDescriptor {
            id: id.clone(),
            index: 0,
        })
    }

    /// Consumes the list into a front-to-back queue of descriptors.
    pub fn into_queue(self) -> FrameQueue {
        FrameQueue {
            remaining: self
                .ids
                .into_iter()
                .enumerate()
                .map(|(index, id)| FrameDescriptor {
                    id,
                    index: index as u64,
                })
                .collect(),
        }
    }
}

/// Descriptors not yet pulled by the driver. Each descriptor is popped exactly once.
#[derive(Debug)]
pub struct FrameQueue {
    remaining: VecDeque<FrameDescriptor>,
}

impl FrameQueue {
    pub fn pop(&mut self) -> Option<FrameDescriptor> {
        self.remaining.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }
}
