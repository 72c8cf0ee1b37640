use crate::command;
use argh::FromArgs;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHasher, Version};

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "argon",
    description = "Hash a password following the argon2id algorithm"
)]
pub struct Options {}

pub struct Command {}

impl Command {
    pub fn run() -> Result<(), command::Error> {
        let password = rpassword::prompt_password("Input Password: ")?;
        let hash = generate_password(&password)?;
        println!("{hash}");
        Ok(())
    }
}

fn generate_password(password: &str) -> Result<String, command::Error> {
    let salt = SaltString::generate(OsRng);

    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default());
    let hash = argon
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| command::Error::PasswordHash(e.to_string()))?;

    Ok(hash.to_string())
}
