use crate::transport::Member;
use rand::Rng;

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum LockType {
    Read,
    Write,
}

/// LockDescriptor names a lock and who holds (or wants) it. A `None` id is the global lock,
/// which excludes every keyed lock. Each acquisition attempt carries its own `token`, so two
/// attempts by the same member on the same lock are never mistaken for one another.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct LockDescriptor {
    pub id: Option<String>,
    pub lock_type: LockType,
    pub member: Member,
    pub token: u64,
}

impl LockDescriptor {
    pub fn write(id: Option<&str>, member: Member) -> Self {
        LockDescriptor {
            id: id.map(str::to_string),
            lock_type: LockType::Write,
            member,
            token: rand::thread_rng().gen(),
        }
    }
}
