use std::error::Error;

///
/// Tells whether an etcd error is worth retrying.
///
/// Transient errors happen because of "outside" forces that cannot be
/// prevented, such as a network partition. Only the lease renewal loop ever
/// retries; every other operation surfaces the error to the caller.
///
/// If the error is for example gRPC status "Not found", it won't be retried.
///
pub fn is_transient(err: &etcd_client::Error) -> bool {
    match err {
        etcd_client::Error::GRpcStatus(status) => match status.code() {
            tonic::Code::Ok => false,
            tonic::Code::Cancelled => false,
            tonic::Code::Unknown => status.source().is_none(),
            tonic::Code::InvalidArgument => false,
            tonic::Code::DeadlineExceeded => true,
            tonic::Code::NotFound => false,
            tonic::Code::AlreadyExists => false,
            tonic::Code::PermissionDenied => false,
            tonic::Code::ResourceExhausted => true,
            tonic::Code::FailedPrecondition => false,
            tonic::Code::Aborted => false,
            tonic::Code::OutOfRange => false,
            tonic::Code::Unimplemented => false,
            tonic::Code::Internal => true,
            tonic::Code::Unavailable => true,
            tonic::Code::DataLoss => true,
            tonic::Code::Unauthenticated => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_transient() {
        let err = etcd_client::Error::GRpcStatus(tonic::Status::unavailable("etcd is down"));
        assert!(is_transient(&err));
    }

    #[test]
    fn not_found_is_not_transient() {
        let err = etcd_client::Error::GRpcStatus(tonic::Status::not_found("no such key"));
        assert!(!is_transient(&err));
    }

    #[test]
    fn non_grpc_errors_are_not_transient() {
        let err = etcd_client::Error::InvalidArgs("bad arguments".to_string());
        assert!(!is_transient(&err));
    }
}
