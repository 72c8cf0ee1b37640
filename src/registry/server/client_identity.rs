use serde::Serialize;

/// Who is asking, as seen by access policies.
///
/// Anonymous clients have neither `id` nor `username`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ClientIdentity {
    pub id: Option<String>,
    pub username: Option<String>,
    pub client_ip: Option<String>,
}
