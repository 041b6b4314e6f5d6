/*!
# Battery DevKit - Utilitaires de test pour le kernel télémétrie

Helpers shared by the kernel's tests:
- Telemetry payload builder with valid defaults
- RFC 3339 timestamp shorthand
- Test tracing subscriber
*/

pub mod payloads;
pub mod test_utils;

pub use payloads::TelemetryPayloadBuilder;
pub use test_utils::{init_test_tracing, minutes, ts};
