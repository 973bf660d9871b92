/// Key construction for the Redis backend.
#[derive(Debug, Clone)]
pub struct KeyContext<'a> {
    pub prefix: &'a str,
}

impl<'a> KeyContext<'a> {
    pub fn new(prefix: &'a str) -> Self {
        Self { prefix }
    }

    /// JSON document holding one row.
    pub fn record(&self, table: &str, id: &str) -> String {
        format!("{}:{}:{}", self.prefix, table, id)
    }

    /// Sorted set of row ids, scored by insertion sequence.
    pub fn ids(&self, table: &str) -> String {
        format!("{}:{}:__ids", self.prefix, table)
    }

    pub fn sequence(&self, table: &str) -> String {
        format!("{}:{}:__seq", self.prefix, table)
    }

    /// Reservation key for one unique field (or constraint) value.
    pub fn unique(&self, table: &str, name: &str, value: &str) -> String {
        format!("{}:{}:unique:{}:{}", self.prefix, table, name, value)
    }

    pub fn transaction_lock(&self) -> String {
        format!("{}:__tx_lock", self.prefix)
    }

    pub fn pattern(&self) -> String {
        format!("{}:*", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_record_and_unique_keys() {
        let ctx = KeyContext::new("consent");
        assert_eq!(ctx.record("domains", "dom_1"), "consent:domains:dom_1");
        assert_eq!(
            ctx.unique("domains", "name", "example.com"),
            "consent:domains:unique:name:example.com"
        );
        assert_eq!(ctx.transaction_lock(), "consent:__tx_lock");
    }
}
