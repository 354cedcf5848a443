//! Messages and server glue for `io.trellis.proxy.destination`

use std::collections::HashMap;

/// A request for discovery or profile information about an authority.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetDestination {
    #[prost(string, tag = "1")]
    pub scheme: String,
    /// Authority of the form
    /// `[<hostname>.]<service>.<namespace>.svc.<cluster-domain>[:<port>]`,
    /// or a bare IPv4/IPv6 address with an optional port.
    #[prost(string, tag = "2")]
    pub path: String,
    /// JSON context supplied by the proxy (`ns`, `nodeName`); a legacy
    /// `ns:<namespace>` form is also accepted.
    #[prost(string, tag = "3")]
    pub context_token: String,
}

/// One incremental change to the endpoint set of a resolved authority.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Update {
    #[prost(oneof = "update::Update", tags = "1, 2, 3")]
    pub update: Option<update::Update>,
}

pub mod update {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Update {
        /// Endpoints to add or upsert.
        #[prost(message, tag = "1")]
        Add(super::WeightedAddrSet),
        /// Endpoints to retire.
        #[prost(message, tag = "2")]
        Remove(super::AddrSet),
        /// The authority resolved, but carries no endpoints.
        #[prost(message, tag = "3")]
        NoEndpoints(super::NoEndpoints),
    }
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct NoEndpoints {
    /// Whether the authority exists at all.
    #[prost(bool, tag = "1")]
    pub exists: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddrSet {
    #[prost(message, repeated, tag = "1")]
    pub addrs: Vec<TcpAddress>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WeightedAddrSet {
    #[prost(message, repeated, tag = "1")]
    pub addrs: Vec<WeightedAddr>,
    /// Labels shared by every address in the set (`service`, `namespace`).
    #[prost(map = "string, string", tag = "2")]
    pub metric_labels: HashMap<String, String>,
}

/// An endpoint enriched with everything the proxy needs to route to it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WeightedAddr {
    #[prost(message, optional, tag = "1")]
    pub addr: Option<TcpAddress>,
    #[prost(uint32, tag = "3")]
    pub weight: u32,
    #[prost(map = "string, string", tag = "4")]
    pub metric_labels: HashMap<String, String>,
    #[prost(message, optional, tag = "5")]
    pub tls_identity: Option<TlsIdentity>,
    #[prost(message, optional, tag = "6")]
    pub authority_override: Option<AuthorityOverride>,
    #[prost(message, optional, tag = "7")]
    pub protocol_hint: Option<ProtocolHint>,
    #[prost(message, optional, tag = "8")]
    pub http2: Option<Http2ClientParams>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TcpAddress {
    #[prost(message, optional, tag = "1")]
    pub ip: Option<IpAddress>,
    #[prost(uint32, tag = "2")]
    pub port: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IpAddress {
    #[prost(oneof = "ip_address::Ip", tags = "1, 2")]
    pub ip: Option<ip_address::Ip>,
}

pub mod ip_address {
    #[derive(Clone, Copy, PartialEq, ::prost::Oneof)]
    pub enum Ip {
        #[prost(fixed32, tag = "1")]
        Ipv4(u32),
        #[prost(message, tag = "2")]
        Ipv6(super::Ipv6),
    }
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Ipv6 {
    /// Most significant 64 bits of the address.
    #[prost(fixed64, tag = "1")]
    pub first: u64,
    /// Least significant 64 bits of the address.
    #[prost(fixed64, tag = "2")]
    pub last: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TlsIdentity {
    /// Identity the proxy should authenticate when connecting.
    #[prost(oneof = "tls_identity::Strategy", tags = "1, 3")]
    pub strategy: Option<tls_identity::Strategy>,
    /// SNI override, when it differs from the identity name.
    #[prost(message, optional, tag = "2")]
    pub server_name: Option<DnsLikeIdentity>,
}

pub mod tls_identity {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Strategy {
        #[prost(message, tag = "1")]
        DnsLikeIdentity(super::DnsLikeIdentity),
        #[prost(message, tag = "3")]
        UriLikeIdentity(super::UriLikeIdentity),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DnsLikeIdentity {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UriLikeIdentity {
    #[prost(string, tag = "1")]
    pub uri: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthorityOverride {
    #[prost(string, tag = "1")]
    pub authority_override: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtocolHint {
    #[prost(oneof = "protocol_hint::Protocol", tags = "1, 2")]
    pub protocol: Option<protocol_hint::Protocol>,
    /// When set, the proxy should tunnel opaque bytes to this inbound
    /// port on the destination proxy.
    #[prost(message, optional, tag = "3")]
    pub opaque_transport: Option<OpaqueTransport>,
}

pub mod protocol_hint {
    #[derive(Clone, Copy, PartialEq, ::prost::Oneof)]
    pub enum Protocol {
        /// The destination can receive transparently upgraded HTTP/2.
        #[prost(message, tag = "1")]
        H2(super::Empty),
        /// The destination handles this connection as an opaque stream.
        #[prost(message, tag = "2")]
        Opaque(super::Empty),
    }
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct OpaqueTransport {
    #[prost(uint32, tag = "1")]
    pub inbound_port: u32,
}

/// HTTP/2 settings the proxy should use toward a meshed endpoint.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Http2ClientParams {
    #[prost(message, optional, tag = "1")]
    pub flow_control: Option<http2_client_params::FlowControl>,
    #[prost(message, optional, tag = "2")]
    pub keep_alive: Option<http2_client_params::KeepAlive>,
}

pub mod http2_client_params {
    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct FlowControl {
        #[prost(bool, tag = "1")]
        pub adaptive_flow_control: bool,
        #[prost(uint32, tag = "2")]
        pub initial_stream_window_size: u32,
        #[prost(uint32, tag = "3")]
        pub initial_connection_window_size: u32,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct KeepAlive {
        #[prost(uint32, tag = "1")]
        pub interval_seconds: u32,
        #[prost(uint32, tag = "2")]
        pub timeout_seconds: u32,
        #[prost(bool, tag = "3")]
        pub while_idle: bool,
    }
}

/// Routing rules, retry policy and protocol information for an authority.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DestinationProfile {
    #[prost(string, tag = "1")]
    pub fully_qualified_name: String,
    /// The target handles connections on this port as an opaque stream.
    #[prost(bool, tag = "2")]
    pub opaque_protocol: bool,
    #[prost(message, repeated, tag = "3")]
    pub routes: Vec<Route>,
    #[prost(message, optional, tag = "4")]
    pub retry_budget: Option<RetryBudget>,
    #[prost(message, repeated, tag = "5")]
    pub dst_overrides: Vec<WeightedDst>,
    /// Populated when the authority names a single endpoint rather than
    /// a service.
    #[prost(message, optional, tag = "6")]
    pub endpoint: Option<WeightedAddr>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Route {
    #[prost(message, optional, tag = "1")]
    pub condition: Option<RequestMatch>,
    #[prost(map = "string, string", tag = "2")]
    pub metrics_labels: HashMap<String, String>,
    #[prost(message, repeated, tag = "3")]
    pub response_classes: Vec<ResponseClass>,
    #[prost(bool, tag = "4")]
    pub is_retryable: bool,
    /// Per-request timeout in milliseconds; zero means unset.
    #[prost(uint64, tag = "5")]
    pub timeout_ms: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestMatch {
    #[prost(oneof = "request_match::Match", tags = "1, 2, 3, 4")]
    pub r#match: Option<request_match::Match>,
}

pub mod request_match {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Match {
        /// Matches when every sub-match does.
        #[prost(message, tag = "1")]
        All(super::RequestMatchSeq),
        /// Matches when any sub-match does.
        #[prost(message, tag = "2")]
        Any(super::RequestMatchSeq),
        /// Anchored regular expression over the request path.
        #[prost(string, tag = "3")]
        PathRegex(String),
        /// HTTP method name, uppercase.
        #[prost(string, tag = "4")]
        Method(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestMatchSeq {
    #[prost(message, repeated, tag = "1")]
    pub matches: Vec<RequestMatch>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResponseClass {
    #[prost(message, optional, tag = "1")]
    pub condition: Option<ResponseMatch>,
    #[prost(bool, tag = "2")]
    pub is_failure: bool,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ResponseMatch {
    /// Inclusive status range, e.g. 500–599 for server errors.
    #[prost(uint32, tag = "1")]
    pub status_min: u32,
    #[prost(uint32, tag = "2")]
    pub status_max: u32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct RetryBudget {
    /// Extra load the budget permits as a fraction of ordinary traffic.
    #[prost(float, tag = "1")]
    pub retry_ratio: f32,
    #[prost(uint32, tag = "2")]
    pub min_retries_per_second: u32,
    #[prost(uint32, tag = "3")]
    pub ttl_seconds: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WeightedDst {
    #[prost(string, tag = "1")]
    pub authority: String,
    #[prost(uint32, tag = "2")]
    pub weight: u32,
}

/// Server implementations for the `Destination` service.
pub mod destination_server {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
    use tonic::codegen::*;

    /// Trait a destination service implementation provides to
    /// `DestinationServer`.
    #[async_trait]
    pub trait Destination: std::marker::Send + std::marker::Sync + 'static {
        /// Server streaming response type for the Get method.
        type GetStream: tonic::codegen::tokio_stream::Stream<
                Item = std::result::Result<super::Update, tonic::Status>,
            > + std::marker::Send
            + 'static;
        async fn get(
            &self,
            request: tonic::Request<super::GetDestination>,
        ) -> std::result::Result<tonic::Response<Self::GetStream>, tonic::Status>;
        /// Server streaming response type for the GetProfile method.
        type GetProfileStream: tonic::codegen::tokio_stream::Stream<
                Item = std::result::Result<super::DestinationProfile, tonic::Status>,
            > + std::marker::Send
            + 'static;
        async fn get_profile(
            &self,
            request: tonic::Request<super::GetDestination>,
        ) -> std::result::Result<tonic::Response<Self::GetProfileStream>, tonic::Status>;
    }

    #[derive(Debug)]
    pub struct DestinationServer<T> {
        inner: Arc<T>,
        accept_compression_encodings: EnabledCompressionEncodings,
        send_compression_encodings: EnabledCompressionEncodings,
        max_decoding_message_size: Option<usize>,
        max_encoding_message_size: Option<usize>,
    }

    impl<T> DestinationServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }
        pub fn from_arc(inner: Arc<T>) -> Self {
            Self {
                inner,
                accept_compression_encodings: Default::default(),
                send_compression_encodings: Default::default(),
                max_decoding_message_size: None,
                max_encoding_message_size: None,
            }
        }
        pub fn with_interceptor<F>(inner: T, interceptor: F) -> InterceptedService<Self, F>
        where
            F: tonic::service::Interceptor,
        {
            InterceptedService::new(Self::new(inner), interceptor)
        }
        /// Enable decompressing requests with the given encoding.
        #[must_use]
        pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.accept_compression_encodings.enable(encoding);
            self
        }
        /// Compress responses with the given encoding, if the client supports it.
        #[must_use]
        pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.send_compression_encodings.enable(encoding);
            self
        }
        /// Limits the maximum size of a decoded message.
        #[must_use]
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.max_decoding_message_size = Some(limit);
            self
        }
        /// Limits the maximum size of an encoded message.
        #[must_use]
        pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
            self.max_encoding_message_size = Some(limit);
            self
        }
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for DestinationServer<T>
    where
        T: Destination,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                "/io.trellis.proxy.destination.Destination/Get" => {
                    #[allow(non_camel_case_types)]
                    struct GetSvc<T: Destination>(pub Arc<T>);
                    impl<T: Destination>
                        tonic::server::ServerStreamingService<super::GetDestination>
                        for GetSvc<T>
                    {
                        type Response = super::Update;
                        type ResponseStream = T::GetStream;
                        type Future =
                            BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::GetDestination>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut =
                                async move { <T as Destination>::get(&inner, request).await };
                            Box::pin(fut)
                        }
                    }
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = GetSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_compression_config(
                                accept_compression_encodings,
                                send_compression_encodings,
                            )
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.server_streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/io.trellis.proxy.destination.Destination/GetProfile" => {
                    #[allow(non_camel_case_types)]
                    struct GetProfileSvc<T: Destination>(pub Arc<T>);
                    impl<T: Destination>
                        tonic::server::ServerStreamingService<super::GetDestination>
                        for GetProfileSvc<T>
                    {
                        type Response = super::DestinationProfile;
                        type ResponseStream = T::GetProfileStream;
                        type Future =
                            BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::GetDestination>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move {
                                <T as Destination>::get_profile(&inner, request).await
                            };
                            Box::pin(fut)
                        }
                    }
                    let accept_compression_encodings = self.accept_compression_encodings;
                    let send_compression_encodings = self.send_compression_encodings;
                    let max_decoding_message_size = self.max_decoding_message_size;
                    let max_encoding_message_size = self.max_encoding_message_size;
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = GetProfileSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec)
                            .apply_compression_config(
                                accept_compression_encodings,
                                send_compression_encodings,
                            )
                            .apply_max_message_size_config(
                                max_decoding_message_size,
                                max_encoding_message_size,
                            );
                        let res = grpc.server_streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                // Retired methods (including the legacy `Endpoints` RPC)
                // fall through to UNIMPLEMENTED.
                _ => Box::pin(async move {
                    let mut response = http::Response::new(empty_body());
                    let headers = response.headers_mut();
                    headers.insert(
                        tonic::Status::GRPC_STATUS,
                        (tonic::Code::Unimplemented as i32).into(),
                    );
                    headers.insert(
                        http::header::CONTENT_TYPE,
                        tonic::metadata::GRPC_CONTENT_TYPE,
                    );
                    Ok(response)
                }),
            }
        }
    }

    impl<T> Clone for DestinationServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self {
                inner,
                accept_compression_encodings: self.accept_compression_encodings,
                send_compression_encodings: self.send_compression_encodings,
                max_decoding_message_size: self.max_decoding_message_size,
                max_encoding_message_size: self.max_encoding_message_size,
            }
        }
    }

    /// Fully qualified gRPC service name.
    pub const SERVICE_NAME: &str = "io.trellis.proxy.destination.Destination";

    impl<T> tonic::server::NamedService for DestinationServer<T> {
        const NAME: &'static str = SERVICE_NAME;
    }
}
