mod balancer;

pub use balancer::Balancer;
pub use balancer::BalancerPolicy;
pub use balancer::LoadGuard;
pub use balancer::Snapshot;
