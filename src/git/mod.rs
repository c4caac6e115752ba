pub mod classifier;
pub mod context;
pub mod executor;

pub use classifier::{classify, split_invocation, GitInvocation, OperationDescriptor, OperationKind};
pub use context::{CommitDistance, ContextGatherer, RepositoryContext};
pub use executor::{GitBackend, SystemGit};
