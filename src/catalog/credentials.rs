//! Credential fetching and lookup

use super::model::{Credential, CredentialType};
use super::{fetch_json, paths, Catalog, FetchError};

/// Fetch each named credential from `collection`, one request per name
///
/// On failure the credentials fetched so far are returned alongside the
/// error. Callers must treat that as a total failure; the partial list only
/// exists for diagnostics.
pub fn fetch_credentials(
    catalog: &dyn Catalog,
    names: &[String],
    collection: &str,
) -> Result<Vec<Credential>, (Vec<Credential>, FetchError)> {
    let mut creds = Vec::with_capacity(names.len());

    for name in names {
        let path = paths::item(collection, name);
        match fetch_json::<Credential>(catalog, &path) {
            Ok(cred) => creds.push(cred),
            Err(e) => return Err((creds, e)),
        }
    }

    Ok(creds)
}

/// Value of the first password credential, if any
pub fn get_password(creds: &[Credential]) -> Option<&str> {
    creds
        .iter()
        .find(|c| c.kind == CredentialType::Password)
        .map(|c| c.value.as_str())
}

/// Iterate over the credentials of one type
pub fn of_type<'a>(
    creds: &'a [Credential],
    kind: &'a CredentialType,
) -> impl Iterator<Item = &'a Credential> + 'a {
    creds.iter().filter(move |c| &c.kind == kind)
}
