//! Protocol models.

pub mod checkin;
pub mod command;
pub mod enrollment;
pub mod push;

pub use checkin::{
    Authenticate, BootstrapTokenResponse, CheckOut, CheckinMessage, DeclarativeManagement,
    GetBootstrapToken, GetToken, GetTokenResponse, SetBootstrapToken, TokenUpdate,
    UserAuthenticate,
};
pub use command::{Command, CommandResults, CommandStatus};
pub use enrollment::{EnrollId, Enrollment, EnrollmentType};
pub use push::PushInfo;
