use crate::{ClientSettings, NodePreference};

pub(crate) fn build_request_metadata(settings: &ClientSettings) -> tonic::metadata::MetadataMap {
    use tonic::metadata::MetadataValue;

    let mut metadata = tonic::metadata::MetadataMap::new();

    if let Some(creds) = settings.default_authenticated_user() {
        let basic_auth_string = base64::encode(format!("{}:{}", creds.login, creds.password));
        let basic_auth = format!("Basic {}", basic_auth_string);

        match MetadataValue::try_from(basic_auth.as_str()) {
            Ok(header_value) => {
                metadata.insert("authorization", header_value);
            }
            Err(e) => warn!("Default credentials can't be sent as a header: {}", e),
        }
    }

    if settings.node_preference() == NodePreference::Leader {
        metadata.insert("requires-leader", MetadataValue::from_static("true"));
    }

    if let Some(conn_name) = settings.connection_name() {
        match MetadataValue::try_from(conn_name) {
            Ok(header_value) => {
                metadata.insert("connection-name", header_value);
            }
            Err(e) => warn!("Invalid connection name '{}': {}", conn_name, e),
        }
    }

    metadata
}
