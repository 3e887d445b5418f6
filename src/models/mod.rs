// Domain models: health samples and runtime events

mod container;
mod event;

pub use container::{
    ContainerCounters, ContainerMetadata, ContainerState, HealthMetric, PortBinding,
};
pub use event::{DockerEvent, EventConversionError, EventKind};
