use std::fmt::{Display, Formatter};

/// A broker as known to the cluster controller.
///
/// The controller supplies the full list of currently-alive registrations
/// before each rebalance pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRegistration {
    /// Broker ID from the controller's membership view.
    pub id: i32,

    /// Rack the broker is placed in, if rack metadata is configured.
    pub rack: Option<String>,
}

impl BrokerRegistration {
    pub fn new(id: i32, rack: Option<String>) -> Self {
        Self { id, rack }
    }
}

impl Display for BrokerRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.rack {
            Some(rack) => write!(f, "{}@{}", self.id, rack),
            None => write!(f, "{}", self.id),
        }
    }
}
