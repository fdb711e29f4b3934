use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Buffered inbound messages awaiting dispatch.
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

fn default_inbound_capacity() -> usize { 1024 }

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: default_inbound_capacity(),
        }
    }
}
