//! Basic Stages
//!
//! Protocol-free stages shipped with the core crate:
//!
//! | Library | Stage name | Variant |
//! |---------|-----------|---------|
//! | `edgeflow-basic-lib` | [`IDENTITY_PROCESSOR`] | Processor |
//! | `edgeflow-basic-lib` | [`NULL_DESTINATION`], [`ERROR_NULL_DESTINATION`], [`STATS_NULL_DESTINATION`] | Destination |
//! | `edgeflow-dev-lib` | [`DEV_RANDOM_ORIGIN`] | Origin |

mod dev_random;
mod identity;
mod trash;

pub use dev_random::{DevRandomConfig, DevRandomOrigin, RANDOM_OFFSET};
pub use identity::IdentityProcessor;
pub use trash::TrashDestination;

use crate::registry;
use crate::stage::Stage;

/// Library of the protocol stages and the basic transforms
pub const BASIC_LIBRARY: &str = "edgeflow-basic-lib";
/// Library of development stages
pub const DEV_LIBRARY: &str = "edgeflow-dev-lib";
/// Library of hardware sensor stages
pub const SENSOR_LIBRARY: &str = "edgeflow-sensor-lib";

/// Identity processor
pub const IDENTITY_PROCESSOR: &str = "edgeflow_stage_processor_identity_IdentityProcessor";
/// Trash destination for regular records
pub const NULL_DESTINATION: &str = "edgeflow_stage_destination_devnull_NullDestination";
/// Trash destination for error records
pub const ERROR_NULL_DESTINATION: &str = "edgeflow_stage_destination_devnull_ToErrorNullDestination";
/// Trash destination for statistics records
pub const STATS_NULL_DESTINATION: &str = "edgeflow_stage_destination_devnull_StatsDpmDirectlyDestination";
/// Random record generator
pub const DEV_RANDOM_ORIGIN: &str = "edgeflow_stage_origin_devtest_RandomDataGeneratorSource";

fn identity_factory() -> Stage {
    Stage::Processor(Box::new(IdentityProcessor::new()))
}

fn trash_factory() -> Stage {
    Stage::Destination(Box::new(TrashDestination::new()))
}

fn dev_random_factory() -> Stage {
    Stage::Origin(Box::new(DevRandomOrigin::new()))
}

/// Register the stages of this module in the global registry
pub fn register_basic_stages() {
    registry::register(BASIC_LIBRARY, IDENTITY_PROCESSOR, identity_factory);
    for name in [NULL_DESTINATION, ERROR_NULL_DESTINATION, STATS_NULL_DESTINATION] {
        registry::register(BASIC_LIBRARY, name, trash_factory);
    }
    registry::register(DEV_LIBRARY, DEV_RANDOM_ORIGIN, dev_random_factory);
}
