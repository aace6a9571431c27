pub mod frame;
pub mod inject;
pub mod keys;
pub mod relay;

pub use frame::{FrameError, InputFrame, KeyBitmap, KeyChange, MouseButton, FRAME_LEN};
pub use inject::{platform_injector, InjectError, InputInjector, TracingInjector, WHEEL_DELTA};
pub use relay::InputRelay;
