use npubdir_core::{
    ChatRef, ConsentState, Error, MessageRef, Npub, OwnerRef, PinChainEntry, Profile, Result,
};
use npubdir_entities::{pin_chain_entries, profiles};

fn corrupt(what: &str, value: impl std::fmt::Display) -> Error {
    Error::storage(anyhow::anyhow!("Corrupt {what} in database: {value}"))
}

pub fn profile_from_model(m: profiles::Model) -> Result<Profile> {
    let identifier =
        Npub::parse(&m.identifier).ok_or_else(|| corrupt("identifier", &m.identifier))?;
    let consent = ConsentState::from_str_lowercase(&m.consent)
        .ok_or_else(|| corrupt("consent state", &m.consent))?;
    let user_id = u64::try_from(m.owner_id).map_err(|_| corrupt("owner id", m.owner_id))?;

    Ok(Profile {
        identifier,
        owner: OwnerRef {
            user_id,
            name: m.owner_name,
            username: m.owner_username,
        },
        custom_name: m.custom_name,
        consent,
        created_at: m.created_at,
        updated_at: m.updated_at,
    })
}

pub fn owner_id_to_db(user_id: u64) -> Result<i64> {
    i64::try_from(user_id).map_err(Error::storage)
}

pub fn entry_from_model(m: pin_chain_entries::Model) -> Result<PinChainEntry> {
    let sequence_index =
        u32::try_from(m.sequence_index).map_err(|_| corrupt("sequence index", m.sequence_index))?;

    Ok(PinChainEntry {
        chat: ChatRef(m.chat_id),
        message: MessageRef(m.message_id),
        sequence_index,
        generation: m.generation,
        is_current: m.is_current,
        content_hash: m.content_hash,
        retired: m.retired,
        created_at: m.created_at,
    })
}

pub fn sequence_index_to_db(index: u32) -> Result<i32> {
    i32::try_from(index).map_err(Error::storage)
}
