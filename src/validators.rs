use crate::appresult::{AppError, AppResult};

pub type ValidationFunction<T> = &'static (dyn for<'r> Fn(&'r T) -> bool + Sync);

pub struct Validator<T: 'static + ?Sized>(&'static [(&'static str, ValidationFunction<T>)]);

impl<T: ?Sized> Validator<T> {
    pub fn run<U: AsRef<T>>(&self, value: U) -> AppResult<()> {
        let Validator(sub_validators) = *self;
        for (message, validator) in sub_validators {
            if !validator(value.as_ref()) {
                return Err(AppError::validation(*message));
            }
        }
        Ok(())
    }
}

macro_rules! min {
    ($n: expr) => {
        |s: &str| s.chars().count() >= $n
    };
}

macro_rules! max {
    ($n: expr) => {
        |s: &str| s.chars().count() <= $n
    };
}

pub static VOID_NAME: Validator<str> = Validator(&[
    ("Void name cannot be empty.", &min!(1)),
    ("Void name shall not be more than 50 characters.", &max!(50)),
]);

pub static NICKNAME: Validator<str> = Validator(&[
    ("Nickname cannot be empty.", &min!(1)),
    ("Nickname shall not be more than 32 characters.", &max!(32)),
]);

pub static MESSAGE: Validator<str> = Validator(&[
    ("Message shall not be more than 2000 characters.", &max!(2000)),
]);

pub static DESCRIPTION: Validator<str> = Validator(&[
    ("Description shall not be more than 280 characters.", &max!(280)),
]);

#[test]
fn validator_test() {
    assert!(VOID_NAME.run("Test").is_ok());
    assert!(VOID_NAME.run("").is_err());
    assert!(VOID_NAME.run("x".repeat(51)).is_err());

    assert!(NICKNAME.run("alice").is_ok());
    assert!(NICKNAME.run("").is_err());
    assert!(NICKNAME.run("ü".repeat(32)).is_ok());

    assert!(MESSAGE.run("").is_ok());
    assert!(MESSAGE.run("x".repeat(2001)).is_err());
}
