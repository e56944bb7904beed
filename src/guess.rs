use serde::Serialize;

/// One authentication attempt: a fixed username and a candidate password.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Guess {
    username: String,
    password: String,
}

impl Guess {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// A length probe: `length` copies of `filler`.
    pub fn filler(username: &str, filler: char, length: usize) -> Self {
        Self::new(username, filler.to_string().repeat(length))
    }

    /// `prefix`, then `candidate`, then `filler` up to `length` characters.
    ///
    /// Every candidate for one position has the same length, so only the
    /// character under test differs between them.
    pub fn padded(
        username: &str,
        prefix: &str,
        candidate: char,
        filler: char,
        length: usize,
    ) -> Self {
        let used = prefix.chars().count() + 1;
        let mut password = String::with_capacity(length);
        password.push_str(prefix);
        password.push(candidate);
        password.extend(std::iter::repeat(filler).take(length.saturating_sub(used)));
        Self::new(username, password)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn len(&self) -> usize {
        self.password.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.password.is_empty()
    }
}
