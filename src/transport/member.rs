use std::fmt;

/// Member is one process in the cluster group. Its identity comes from the group layer.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Member(String);

impl Member {
    pub fn new(name: impl Into<String>) -> Self {
        Member(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
