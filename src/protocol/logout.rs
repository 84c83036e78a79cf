use log::info;

use crate::actors::{Student, University};
use crate::error::Result;

/// Drop the session key on both sides. The student falls back to the
/// university's public key, so the next run starts with authentication.
pub fn logout(student: &mut Student, university: &mut University) -> Result<()> {
    let public = university.public_capability()?;
    university.principal_mut().remove_key(student.code());
    student.principal_mut().add_key(university.code(), public);
    info!("{} logged out of {}", student.code(), university.code());
    Ok(())
}
