//! Concrete action state machines (spec §4.6). The source models each kind
//! as a subclass; here each is a variant of a tagged enum carrying its own
//! state, per spec §9's "action as tagged variant" note.

use tracing::warn;

use crate::crypto::{EnScrypt, EnScryptMode, KEY_SIZE};
use crate::entropy::EntropyPool;
use crate::error::SqrlError;
use crate::scheduler::{ActionId, AuthKind, Callback};
use crate::settings::RESCUE_ENSCRYPT_SECONDS;
use crate::storage::{Storage, Type1Block, Type2Block, Type3Block};
use crate::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Generate,
    Save,
    Rescue,
    Rekey,
    Lock,
    ChangePassword,
}

#[derive(Debug, Clone)]
pub enum ActionStatus {
    Success,
    Canceled,
    Failed(String),
}

#[derive(Debug)]
pub enum ActionOutcome {
    Continue,
    Complete(ActionStatus),
}

enum GenerateState {
    Rekey,
    NeedPassword,
    SuggestSave,
}

enum SaveState {
    RequirePassword,
    AllocStorage,
    Type1Stretch { salt: [u8; 16], stretch: EnScrypt },
    Type2Stretch { salt: [u8; 16], stretch: EnScrypt },
    WriteType3,
    SuggestSave,
}

enum RescueState {
    NeedRescueCode,
    Decrypt,
}

enum RekeyState {
    ForceRescue,
    DoRekey,
    NeedPassword,
    SuggestSave,
}

enum ChangePasswordState {
    ForceDecrypt,
    NeedNewPassword,
    SuggestSave,
}

enum State {
    Generate(GenerateState),
    Save(SaveState),
    Rescue(RescueState),
    Rekey(RekeyState),
    Lock,
    ChangePassword(ChangePasswordState),
}

/// A pending rescue-code entry an embedder supplies via `authenticate`.
#[derive(Default)]
pub struct Credentials {
    pub rescue_code: Option<[u8; 24]>,
    pub new_password: Option<Vec<u8>>,
}

pub struct Action {
    pub kind: ActionKind,
    pub should_cancel: bool,
    pub rapid: bool,
    pub credentials: Credentials,
    state: State,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        let state = match kind {
            ActionKind::Generate => State::Generate(GenerateState::Rekey),
            ActionKind::Save => State::Save(SaveState::RequirePassword),
            ActionKind::Rescue => State::Rescue(RescueState::NeedRescueCode),
            ActionKind::Rekey => State::Rekey(RekeyState::ForceRescue),
            ActionKind::Lock => State::Lock,
            ActionKind::ChangePassword => State::ChangePassword(ChangePasswordState::ForceDecrypt),
        };
        Self { kind, should_cancel: false, rapid: false, credentials: Credentials::default(), state }
    }

    /// Supplies a credential requested via an `AuthRequired` callback.
    pub fn authenticate(&mut self, kind: AuthKind, user: &mut User, bytes: &[u8]) -> crate::error::Result<()> {
        match kind {
            AuthKind::Password | AuthKind::NewPassword => user.set_password(bytes),
            AuthKind::RescueCode => {
                if bytes.len() != 24 {
                    return Err(SqrlError::State("rescue code must be 24 digits".into()));
                }
                let mut code = [0u8; 24];
                code.copy_from_slice(bytes);
                self.credentials.rescue_code = Some(code);
                Ok(())
            }
            AuthKind::Hint => Ok(()),
        }
    }

    /// One state transition. MUST NOT block; EnScrypt stretches advance one
    /// iteration per call via `EnScrypt::update`.
    pub fn step(&mut self, id: ActionId, user: &mut User, entropy: &mut EntropyPool) -> (ActionOutcome, Vec<Callback>) {
        if self.should_cancel {
            return (ActionOutcome::Complete(ActionStatus::Canceled), Vec::new());
        }
        match self.run(id, user, entropy) {
            Ok(result) => result,
            Err(e) => {
                warn!(action = id, kind = ?self.kind, error = %e, "action failed");
                (ActionOutcome::Complete(ActionStatus::Failed(e.to_string())), Vec::new())
            }
        }
    }

    fn run(&mut self, id: ActionId, user: &mut User, entropy: &mut EntropyPool) -> crate::error::Result<(ActionOutcome, Vec<Callback>)> {
        match &mut self.state {
            State::Generate(s) => run_generate(s, id, user, entropy),
            State::Save(s) => run_save(s, id, user, entropy),
            State::Rescue(s) => run_rescue(s, id, user, &self.credentials),
            State::Rekey(s) => run_rekey(s, id, user, entropy, &self.credentials),
            State::Lock => run_lock(user, entropy),
            State::ChangePassword(s) => run_change_password(s, id, user, &self.credentials),
        }
    }
}

fn need(id: ActionId, kind: AuthKind) -> crate::error::Result<(ActionOutcome, Vec<Callback>)> {
    Ok((ActionOutcome::Continue, vec![Callback::AuthRequired { action: id, kind }]))
}

fn done(status: ActionStatus) -> crate::error::Result<(ActionOutcome, Vec<Callback>)> {
    Ok((ActionOutcome::Complete(status), Vec::new()))
}

fn next(outcome: ActionOutcome) -> crate::error::Result<(ActionOutcome, Vec<Callback>)> {
    Ok((outcome, Vec::new()))
}

fn run_generate(
    state: &mut GenerateState,
    id: ActionId,
    user: &mut User,
    entropy: &mut EntropyPool,
) -> crate::error::Result<(ActionOutcome, Vec<Callback>)> {
    match state {
        GenerateState::Rekey => {
            user.rekey(entropy);
            *state = GenerateState::NeedPassword;
            next(ActionOutcome::Continue)
        }
        GenerateState::NeedPassword => {
            if user.password.is_empty() {
                return need(id, AuthKind::NewPassword);
            }
            *state = GenerateState::SuggestSave;
            next(ActionOutcome::Continue)
        }
        GenerateState::SuggestSave => done(ActionStatus::Success),
    }
}

fn run_save(
    state: &mut SaveState,
    id: ActionId,
    user: &mut User,
    entropy: &mut EntropyPool,
) -> crate::error::Result<(ActionOutcome, Vec<Callback>)> {
    match state {
        SaveState::RequirePassword => {
            if user.password.is_empty() {
                return need(id, AuthKind::Password);
            }
            *state = SaveState::AllocStorage;
            next(ActionOutcome::Continue)
        }
        SaveState::AllocStorage => {
            if user.storage.is_none() {
                user.storage = Some(Storage::new());
            }
            let salt_bytes = entropy.bytes(16);
            let mut salt = [0u8; 16];
            salt.copy_from_slice(&salt_bytes);
            let stretch = EnScrypt::new(
                user.password.as_slice(),
                &salt,
                user.options.n_factor,
                EnScryptMode::Millis(user.options.enscrypt_seconds as u32 * 1000),
            );
            *state = SaveState::Type1Stretch { salt, stretch };
            next(ActionOutcome::Continue)
        }
        SaveState::Type1Stretch { salt, stretch } => {
            if !stretch.is_finished() {
                stretch.update()?;
                return next(ActionOutcome::Continue);
            }
            let mk = *user.mk().ok_or_else(|| SqrlError::State("MK unavailable for save".into()))?;
            let ilk = *user.ilk().ok_or_else(|| SqrlError::State("ILK unavailable for save".into()))?;
            let block = Type1Block::seal(
                stretch.result(),
                [0u8; 12],
                *salt,
                user.options.n_factor,
                stretch.iterations(),
                0,
                user.options.hint_length,
                user.options.enscrypt_seconds,
                user.options.timeout_minutes,
                &mk,
                &ilk,
            )?;
            user.storage.as_mut().unwrap().type1 = Some(block);

            let rescue_salt_bytes = entropy.bytes(16);
            let mut rescue_salt = [0u8; 16];
            rescue_salt.copy_from_slice(&rescue_salt_bytes);
            let rescue_code = user_rescue_code_or_err(user)?;
            let rescue_stretch = EnScrypt::new(
                &rescue_code,
                &rescue_salt,
                user.options.n_factor,
                EnScryptMode::Millis(RESCUE_ENSCRYPT_SECONDS as u32 * 1000),
            );
            *state = SaveState::Type2Stretch { salt: rescue_salt, stretch: rescue_stretch };
            next(ActionOutcome::Continue)
        }
        SaveState::Type2Stretch { salt, stretch } => {
            if !stretch.is_finished() {
                stretch.update()?;
                return next(ActionOutcome::Continue);
            }
            let iuk = *user.iuk().ok_or_else(|| SqrlError::State("IUK unavailable for save".into()))?;
            let block = Type2Block::seal(stretch.result(), *salt, user.options.n_factor, stretch.iterations(), &iuk)?;
            user.storage.as_mut().unwrap().type2 = Some(block);
            *state = SaveState::WriteType3;
            next(ActionOutcome::Continue)
        }
        SaveState::WriteType3 => {
            let mk = *user.mk().ok_or_else(|| SqrlError::State("MK unavailable for save".into()))?;
            let mut previous = [[0u8; KEY_SIZE]; 4];
            for (i, slot) in previous.iter_mut().enumerate() {
                if let Some(piuk) = user.previous_iuk(i) {
                    *slot = *piuk;
                }
            }
            let block = Type3Block::seal(&mk, &previous)?;
            user.storage.as_mut().unwrap().type3 = Some(block);
            *state = SaveState::SuggestSave;
            next(ActionOutcome::Continue)
        }
        SaveState::SuggestSave => done(ActionStatus::Success),
    }
}

fn user_rescue_code_or_err(user: &User) -> crate::error::Result<Vec<u8>> {
    user.rescue_code()
        .map(|code| code.to_vec())
        .ok_or_else(|| SqrlError::State("no rescue code available in this session; run Rekey first".into()))
}

fn run_rescue(
    state: &mut RescueState,
    id: ActionId,
    user: &mut User,
    credentials: &Credentials,
) -> crate::error::Result<(ActionOutcome, Vec<Callback>)> {
    match state {
        RescueState::NeedRescueCode => {
            if credentials.rescue_code.is_none() {
                return need(id, AuthKind::RescueCode);
            }
            *state = RescueState::Decrypt;
            next(ActionOutcome::Continue)
        }
        RescueState::Decrypt => {
            let code = credentials.rescue_code.ok_or_else(|| SqrlError::State("rescue code missing".into()))?;
            let type2 = user
                .storage
                .as_ref()
                .and_then(|s| s.type2.as_ref())
                .ok_or_else(|| SqrlError::Storage("no rescue block present".into()))?;
            let (key, _) = EnScrypt::new(&code, &type2.salt, type2.n_factor, EnScryptMode::Iterations(type2.iter_count)).run_to_completion()?;
            let iuk = type2.open(&key)?;
            user.install_from_rescue(iuk);
            done(ActionStatus::Success)
        }
    }
}

fn run_rekey(
    state: &mut RekeyState,
    id: ActionId,
    user: &mut User,
    entropy: &mut EntropyPool,
    credentials: &Credentials,
) -> crate::error::Result<(ActionOutcome, Vec<Callback>)> {
    match state {
        RekeyState::ForceRescue => {
            if user.iuk().is_none() {
                let Some(code) = credentials.rescue_code else {
                    return need(id, AuthKind::RescueCode);
                };
                let type2 = user
                    .storage
                    .as_ref()
                    .and_then(|s| s.type2.as_ref())
                    .ok_or_else(|| SqrlError::Storage("no rescue block present".into()))?;
                let (key, _) =
                    EnScrypt::new(&code, &type2.salt, type2.n_factor, EnScryptMode::Iterations(type2.iter_count)).run_to_completion()?;
                let iuk = type2.open(&key)?;
                user.install_from_rescue(iuk);
            }
            *state = RekeyState::DoRekey;
            next(ActionOutcome::Continue)
        }
        RekeyState::DoRekey => {
            user.rekey(entropy);
            *state = RekeyState::NeedPassword;
            next(ActionOutcome::Continue)
        }
        RekeyState::NeedPassword => {
            if user.password.is_empty() {
                return need(id, AuthKind::NewPassword);
            }
            *state = RekeyState::SuggestSave;
            next(ActionOutcome::Continue)
        }
        RekeyState::SuggestSave => done(ActionStatus::Success),
    }
}

/// Hint-lock (spec §4.6 Lock). A fresh 16-byte salt is drawn every time,
/// matching spec §9's guidance to treat the IV/salt as freshly generated
/// rather than copy the source's zero-IV idiom.
fn run_lock(user: &mut User, entropy: &mut EntropyPool) -> crate::error::Result<(ActionOutcome, Vec<Callback>)> {
    let salt_bytes = entropy.bytes(16);
    let mut salt = [0u8; 16];
    salt.copy_from_slice(&salt_bytes);
    let hint_len = (user.options.hint_length as usize).max(1).min(user.password.len());
    user.hint_lock(hint_len, salt, user.options.n_factor, 1)?;
    done(ActionStatus::Success)
}

fn run_change_password(
    state: &mut ChangePasswordState,
    id: ActionId,
    user: &mut User,
    credentials: &Credentials,
) -> crate::error::Result<(ActionOutcome, Vec<Callback>)> {
    match state {
        ChangePasswordState::ForceDecrypt => {
            if user.mk().is_none() {
                return Err(SqrlError::State("identity must be unlocked before changing its password".into()));
            }
            *state = ChangePasswordState::NeedNewPassword;
            next(ActionOutcome::Continue)
        }
        ChangePasswordState::NeedNewPassword => {
            let Some(new_password) = credentials.new_password.clone() else {
                return need(id, AuthKind::NewPassword);
            };
            user.set_password(&new_password)?;
            *state = ChangePasswordState::SuggestSave;
            next(ActionOutcome::Continue)
        }
        ChangePasswordState::SuggestSave => done(ActionStatus::Success),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::UserOptions;

    #[test]
    fn generate_then_lock_zeroes_in_memory_keys() {
        let mut user = User::new(UserOptions::default());
        user.set_password(b"the password").unwrap();
        let mut entropy = EntropyPool::new();
        entropy.add(b"seed");

        let mut generate = Action::new(ActionKind::Generate);
        loop {
            match generate.step(1, &mut user, &mut entropy).0 {
                ActionOutcome::Continue => continue,
                ActionOutcome::Complete(status) => {
                    assert!(matches!(status, ActionStatus::Success));
                    break;
                }
            }
        }
        assert!(user.mk().is_some());

        let mut lock = Action::new(ActionKind::Lock);
        let (outcome, _) = lock.step(2, &mut user, &mut entropy);
        assert!(matches!(outcome, ActionOutcome::Complete(ActionStatus::Success)));
        assert!(user.mk().is_none());
    }

    #[test]
    fn change_password_requires_unlocked_identity() {
        let mut user = User::new(UserOptions::default());
        let mut entropy = EntropyPool::new();
        let mut action = Action::new(ActionKind::ChangePassword);
        let (outcome, _) = action.step(1, &mut user, &mut entropy);
        assert!(matches!(outcome, ActionOutcome::Complete(ActionStatus::Failed(_))));
    }
}
