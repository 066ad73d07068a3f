use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// ReplicaId identifies one backing database in the cluster. Replicas are totally ordered by id,
/// which is what makes "primary" deterministic across members.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        ReplicaId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the backing database lives relative to this process.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Locality {
    Remote,
    /// Lives inside this process. Embedded replicas are deactivated locally on shutdown, since
    /// their data stops being reachable the moment we exit.
    Embedded,
}

#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
}

// Never print passwords into the info log.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Opaque description of how to reach a replica. Interpreted by the `ConnectionFactory` and by
/// the dump/restore synchronization commands.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectionDescriptor {
    pub location: String,
    pub credentials: Option<Credentials>,
    pub properties: BTreeMap<String, String>,
}

impl ConnectionDescriptor {
    pub fn new(location: impl Into<String>) -> Self {
        ConnectionDescriptor {
            location: location.into(),
            ..ConnectionDescriptor::default()
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Some(Credentials {
            user: user.into(),
            password,
        });
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Replica is one backing database instance. It's immutable after construction and outlives any
/// number of activation/deactivation cycles.
#[derive(Clone, Debug)]
pub struct Replica {
    id: ReplicaId,
    weight: u32,
    locality: Locality,
    descriptor: ConnectionDescriptor,
}

impl Replica {
    pub fn new(id: impl Into<String>, descriptor: ConnectionDescriptor) -> Self {
        Replica {
            id: ReplicaId::new(id),
            weight: 1,
            locality: Locality::Remote,
            descriptor,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = locality;
        self
    }

    pub fn id(&self) -> &ReplicaId {
        &self.id
    }

    /// Relative probability of being picked by a random balancer.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn locality(&self) -> Locality {
        self.locality
    }

    pub fn is_embedded(&self) -> bool {
        self.locality == Locality::Embedded
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }
}

impl PartialEq for Replica {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Replica {}

impl PartialOrd for Replica {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Replica {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}
