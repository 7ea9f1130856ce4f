//! PDU (Protocol Data Unit) handling for the DLMS/COSEM application layer
//!
//! The engine uses a fixed set of message shapes rather than a general BER
//! encoder:
//!
//! | APDU            | tag  | body                                                      |
//! |-----------------|------|-----------------------------------------------------------|
//! | AARQ            | 0x60 | context name, mechanism, credential, calling title, xDLMS |
//! | AARE            | 0x61 | context name, result, diagnostic, responding title, xDLMS |
//! | RLRQ            | 0x62 | `03 80 01 00`                                             |
//! | RLRE            | 0x63 | `03 80 01 00`                                             |
//! | GET-request     | 0xC0 | `01 iid class(2) obis(6) attr`                            |
//! | GET-response    | 0xC4 | `01 iid result dar data`                                  |
//! | SET-request     | 0xC1 | `01 iid class(2) obis(6) attr data`                       |
//! | SET-response    | 0xC5 | `01 iid result`                                           |
//! | ACTION-request  | 0xC3 | `01 iid class(2) obis(6) method 00` or `.. 01 data`       |
//! | ACTION-response | 0xC7 | `01 iid result` with optional `01 00 data`                |

use crate::association::context::{Authentication, AuthenticationMechanism};
use dlms_asn1::{decode_length, encode_length, AxdrDecoder, AxdrEncoder};
use dlms_core::{DataObject, DlmsError, DlmsResult, ObisCode};

/// APDU tag values
pub mod tag {
    pub const AARQ: u8 = 0x60;
    pub const AARE: u8 = 0x61;
    pub const RLRQ: u8 = 0x62;
    pub const RLRE: u8 = 0x63;
    pub const GET_REQUEST: u8 = 0xC0;
    pub const SET_REQUEST: u8 = 0xC1;
    pub const ACTION_REQUEST: u8 = 0xC3;
    pub const GET_RESPONSE: u8 = 0xC4;
    pub const SET_RESPONSE: u8 = 0xC5;
    pub const ACTION_RESPONSE: u8 = 0xC7;
}

/// Request/response type "normal"
pub const TYPE_NORMAL: u8 = 0x01;

/// Data access result "object-unavailable"
pub const DAR_OBJECT_UNAVAILABLE: u8 = 0x01;

/// Logical name referencing, no ciphering
const APPLICATION_CONTEXT_LN: [u8; 11] = [0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01];

/// Mechanism name OID prefix, followed by the mechanism id
const MECHANISM_NAME_PREFIX: [u8; 8] = [0x8B, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x02];

/// ACSE requirements with the authentication functional unit set
const ACSE_REQUIREMENTS: [u8; 4] = [0x8A, 0x02, 0x07, 0x80];

/// xDLMS InitiateRequest: version 6, conformance 0x007E1F, max PDU 0x04B0
const INITIATE_REQUEST: [u8; 18] = [
    0xBE, 0x10, 0x04, 0x0E, 0x01, 0x00, 0x00, 0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00, 0x00, 0x7E, 0x1F,
    0x04, 0xB0,
];

/// xDLMS InitiateResponse: version 6, conformance 0x00181D, max PDU 0x0400, VAA 7
const INITIATE_RESPONSE: [u8; 18] = [
    0xBE, 0x10, 0x04, 0x0E, 0x08, 0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00, 0x00, 0x18, 0x1D, 0x04, 0x00,
    0x00, 0x07,
];

const RELEASE_BODY: [u8; 4] = [0x03, 0x80, 0x01, 0x00];

/// Association result carried in AARE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationResult {
    Accepted,
    RejectedPermanent,
    RejectedTransient,
}

impl AssociationResult {
    pub fn from_u8(value: u8) -> DlmsResult<Self> {
        match value {
            0 => Ok(AssociationResult::Accepted),
            1 => Ok(AssociationResult::RejectedPermanent),
            2 => Ok(AssociationResult::RejectedTransient),
            other => Err(DlmsError::Protocol(format!("invalid association result {}", other))),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            AssociationResult::Accepted => 0,
            AssociationResult::RejectedPermanent => 1,
            AssociationResult::RejectedTransient => 2,
        }
    }
}

/// COSEM attribute reference: interface class, instance and attribute index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeDescriptor {
    pub class_id: u16,
    pub obis: ObisCode,
    pub attribute_id: u8,
}

impl AttributeDescriptor {
    pub fn new(class_id: u16, obis: ObisCode, attribute_id: u8) -> Self {
        Self {
            class_id,
            obis,
            attribute_id,
        }
    }
}

/// COSEM method reference: interface class, instance and method index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub class_id: u16,
    pub obis: ObisCode,
    pub method_id: u8,
}

impl MethodDescriptor {
    pub fn new(class_id: u16, obis: ObisCode, method_id: u8) -> Self {
        Self {
            class_id,
            obis,
            method_id,
        }
    }
}

/// Association request (AARQ)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AarqApdu {
    /// Client SAP carried in the calling AP title
    pub client_id: u8,
    pub authentication: Authentication,
    /// Calling AP title of the peer when it carries an octet string
    ///
    /// Meters dialing in put their meter number here.
    pub calling_title: Option<Vec<u8>>,
}

impl AarqApdu {
    pub fn new(client_id: u8, authentication: Authentication) -> Self {
        Self {
            client_id,
            authentication,
            calling_title: None,
        }
    }

    /// AARQ as sent by a meter that identifies itself with its number
    pub fn with_calling_title(authentication: Authentication, title: &[u8]) -> Self {
        Self {
            client_id: 0,
            authentication,
            calling_title: Some(title.to_vec()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(64);
        body.extend_from_slice(&APPLICATION_CONTEXT_LN);

        let mechanism = self.authentication.mechanism();
        if mechanism != AuthenticationMechanism::None {
            let secret = self.authentication.secret();
            body.extend_from_slice(&ACSE_REQUIREMENTS);
            body.extend_from_slice(&MECHANISM_NAME_PREFIX);
            body.push(mechanism as u8);
            let mut value = vec![0x80];
            encode_length(secret.len(), &mut value);
            value.extend_from_slice(secret);
            push_tlv(&mut body, 0xAC, &value);
        }

        match &self.calling_title {
            Some(title) => {
                let mut value = vec![0x04];
                encode_length(title.len(), &mut value);
                value.extend_from_slice(title);
                push_tlv(&mut body, 0xA6, &value);
            }
            None => body.extend_from_slice(&[0xA6, 0x03, 0x02, 0x01, self.client_id]),
        }

        body.extend_from_slice(&INITIATE_REQUEST);

        let mut out = Vec::with_capacity(body.len() + 3);
        push_tlv(&mut out, tag::AARQ, &body);
        out
    }

    /// Decode the body following the AARQ tag and length
    fn decode_body(body: &[u8]) -> DlmsResult<Self> {
        let mut client_id = 0;
        let mut calling_title = None;
        let mut mechanism = AuthenticationMechanism::None;
        let mut secret = Vec::new();

        for (tlv_tag, value) in TlvIter::new(body) {
            let value = value?;
            match tlv_tag {
                0x8B => {
                    mechanism = value
                        .last()
                        .map(|&m| AuthenticationMechanism::from_u8(m))
                        .transpose()?
                        .unwrap_or(AuthenticationMechanism::None);
                }
                0xAC => {
                    if let Some((_, inner)) = TlvIter::new(value).next() {
                        secret = inner?.to_vec();
                    }
                }
                0xA6 => match TlvIter::new(value).next() {
                    Some((0x04, inner)) => calling_title = Some(inner?.to_vec()),
                    Some((0x02, inner)) => client_id = inner?.last().copied().unwrap_or(0),
                    _ => log::debug!("unsupported calling AP title form: {:02X?}", value),
                },
                _ => {}
            }
        }

        let secret = String::from_utf8_lossy(&secret).into_owned();
        let authentication = match mechanism {
            AuthenticationMechanism::None => Authentication::None,
            AuthenticationMechanism::Low => Authentication::Low(secret),
            AuthenticationMechanism::High => Authentication::High(secret),
        };

        Ok(Self {
            client_id,
            authentication,
            calling_title,
        })
    }

    /// Meter number from the calling AP title
    ///
    /// Printable titles are returned as text, anything else as upper-case hex.
    pub fn meter_number(&self) -> Option<String> {
        let title = self.calling_title.as_ref()?;
        if title.is_empty() {
            return None;
        }
        if title.iter().all(|b| b.is_ascii_graphic()) {
            Some(String::from_utf8_lossy(title).into_owned())
        } else {
            Some(title.iter().map(|b| format!("{:02X}", b)).collect())
        }
    }
}

/// Association response (AARE)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AareApdu {
    pub result: AssociationResult,
    pub diagnostic: u8,
    pub responding_title: Option<Vec<u8>>,
}

impl AareApdu {
    pub fn accepted() -> Self {
        Self {
            result: AssociationResult::Accepted,
            diagnostic: 0,
            responding_title: None,
        }
    }

    /// Accepted, announcing our system title
    pub fn accepted_with_title(title: &[u8]) -> Self {
        Self {
            responding_title: Some(title.to_vec()),
            ..Self::accepted()
        }
    }

    pub fn rejected(result: AssociationResult, diagnostic: u8) -> Self {
        Self {
            result,
            diagnostic,
            responding_title: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.result == AssociationResult::Accepted
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(48);
        body.extend_from_slice(&APPLICATION_CONTEXT_LN);
        body.extend_from_slice(&[0xA2, 0x03, 0x02, 0x01, self.result.to_u8()]);
        body.extend_from_slice(&[0xA3, 0x05, 0xA1, 0x03, 0x02, 0x01, self.diagnostic]);
        if let Some(title) = &self.responding_title {
            let mut value = vec![0x04];
            encode_length(title.len(), &mut value);
            value.extend_from_slice(title);
            push_tlv(&mut body, 0xA4, &value);
        }
        body.extend_from_slice(&INITIATE_RESPONSE);

        let mut out = Vec::with_capacity(body.len() + 3);
        push_tlv(&mut out, tag::AARE, &body);
        out
    }

    fn decode_body(body: &[u8]) -> DlmsResult<Self> {
        let mut result = None;
        let mut diagnostic = 0;
        let mut responding_title = None;

        for (tlv_tag, value) in TlvIter::new(body) {
            let value = value?;
            match tlv_tag {
                0xA2 => {
                    let byte = innermost_byte(value)?;
                    result = Some(AssociationResult::from_u8(byte)?);
                }
                0xA3 => {
                    // associate-source-diagnostic: [1] acse-service-user or [2] acse-service-provider
                    if let Some((_, inner)) = TlvIter::new(value).next() {
                        diagnostic = innermost_byte(inner?)?;
                    }
                }
                0xA4 => {
                    if let Some((0x04, inner)) = TlvIter::new(value).next() {
                        responding_title = Some(inner?.to_vec());
                    }
                }
                _ => {}
            }
        }

        let result = result.ok_or_else(|| DlmsError::Protocol("AARE without result".to_string()))?;
        Ok(Self {
            result,
            diagnostic,
            responding_title,
        })
    }
}

/// GET-request, normal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    pub invoke_id: u8,
    pub descriptor: AttributeDescriptor,
}

/// Outcome carried by a GET-response
#[derive(Debug, Clone, PartialEq)]
pub enum GetDataResult {
    Data(DataObject),
    DataAccessError(u8),
}

/// GET-response, normal
#[derive(Debug, Clone, PartialEq)]
pub struct GetResponse {
    pub invoke_id: u8,
    pub result: GetDataResult,
}

impl GetResponse {
    pub fn data(invoke_id: u8, value: DataObject) -> Self {
        Self {
            invoke_id,
            result: GetDataResult::Data(value),
        }
    }

    pub fn error(invoke_id: u8, code: u8) -> Self {
        Self {
            invoke_id,
            result: GetDataResult::DataAccessError(code),
        }
    }

    /// Decoded value, or `DataAccessError` when the meter refused the read
    pub fn into_value(self) -> DlmsResult<DataObject> {
        match self.result {
            GetDataResult::Data(value) => Ok(value),
            GetDataResult::DataAccessError(code) => Err(DlmsError::DataAccessError(code)),
        }
    }
}

/// SET-request, normal
#[derive(Debug, Clone, PartialEq)]
pub struct SetRequest {
    pub invoke_id: u8,
    pub descriptor: AttributeDescriptor,
    pub value: DataObject,
}

/// SET-response, normal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetResponse {
    pub invoke_id: u8,
    pub result: u8,
}

impl SetResponse {
    pub fn check(&self) -> DlmsResult<()> {
        match self.result {
            0 => Ok(()),
            code => Err(DlmsError::DataAccessError(code)),
        }
    }
}

/// ACTION-request, normal
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub invoke_id: u8,
    pub descriptor: MethodDescriptor,
    pub parameters: Option<DataObject>,
}

/// ACTION-response, normal
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResponse {
    pub invoke_id: u8,
    pub result: u8,
    pub return_data: Option<DataObject>,
}

impl ActionResponse {
    /// Return data of a successful invocation, `Null` when there is none
    pub fn into_value(self) -> DlmsResult<DataObject> {
        match self.result {
            0 => Ok(self.return_data.unwrap_or(DataObject::Null)),
            code => Err(DlmsError::DataAccessError(code)),
        }
    }
}

/// Any APDU exchanged by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Apdu {
    Aarq(AarqApdu),
    Aare(AareApdu),
    ReleaseRequest,
    ReleaseResponse,
    GetRequest(GetRequest),
    GetResponse(GetResponse),
    SetRequest(SetRequest),
    SetResponse(SetResponse),
    ActionRequest(ActionRequest),
    ActionResponse(ActionResponse),
}

impl Apdu {
    pub fn tag(&self) -> u8 {
        match self {
            Apdu::Aarq(_) => tag::AARQ,
            Apdu::Aare(_) => tag::AARE,
            Apdu::ReleaseRequest => tag::RLRQ,
            Apdu::ReleaseResponse => tag::RLRE,
            Apdu::GetRequest(_) => tag::GET_REQUEST,
            Apdu::GetResponse(_) => tag::GET_RESPONSE,
            Apdu::SetRequest(_) => tag::SET_REQUEST,
            Apdu::SetResponse(_) => tag::SET_RESPONSE,
            Apdu::ActionRequest(_) => tag::ACTION_REQUEST,
            Apdu::ActionResponse(_) => tag::ACTION_RESPONSE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Apdu::Aarq(_) => "AARQ",
            Apdu::Aare(_) => "AARE",
            Apdu::ReleaseRequest => "RLRQ",
            Apdu::ReleaseResponse => "RLRE",
            Apdu::GetRequest(_) => "GET-request",
            Apdu::GetResponse(_) => "GET-response",
            Apdu::SetRequest(_) => "SET-request",
            Apdu::SetResponse(_) => "SET-response",
            Apdu::ActionRequest(_) => "ACTION-request",
            Apdu::ActionResponse(_) => "ACTION-response",
        }
    }

    /// Invoke id of data service APDUs
    pub fn invoke_id(&self) -> Option<u8> {
        match self {
            Apdu::GetRequest(r) => Some(r.invoke_id),
            Apdu::GetResponse(r) => Some(r.invoke_id),
            Apdu::SetRequest(r) => Some(r.invoke_id),
            Apdu::SetResponse(r) => Some(r.invoke_id),
            Apdu::ActionRequest(r) => Some(r.invoke_id),
            Apdu::ActionResponse(r) => Some(r.invoke_id),
            _ => None,
        }
    }

    /// GET/SET/ACTION response
    pub fn is_data_response(&self) -> bool {
        matches!(
            self,
            Apdu::GetResponse(_) | Apdu::SetResponse(_) | Apdu::ActionResponse(_)
        )
    }

    /// GET/SET/ACTION request
    pub fn is_data_request(&self) -> bool {
        matches!(
            self,
            Apdu::GetRequest(_) | Apdu::SetRequest(_) | Apdu::ActionRequest(_)
        )
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Apdu::Aarq(aarq) => aarq.encode(),
            Apdu::Aare(aare) => aare.encode(),
            Apdu::ReleaseRequest => [&[tag::RLRQ][..], &RELEASE_BODY].concat(),
            Apdu::ReleaseResponse => [&[tag::RLRE][..], &RELEASE_BODY].concat(),
            Apdu::GetRequest(req) => {
                let mut out = service_header(tag::GET_REQUEST, req.invoke_id);
                push_descriptor(&mut out, req.descriptor.class_id, &req.descriptor.obis, req.descriptor.attribute_id);
                out
            }
            Apdu::GetResponse(resp) => {
                let mut out = service_header(tag::GET_RESPONSE, resp.invoke_id);
                match &resp.result {
                    GetDataResult::Data(value) => {
                        out.extend_from_slice(&[0x00, 0x00]);
                        let mut encoder = AxdrEncoder::with_capacity(16);
                        encoder.encode_data_object(value);
                        out.extend_from_slice(encoder.as_bytes());
                    }
                    GetDataResult::DataAccessError(code) => out.extend_from_slice(&[0x01, *code]),
                }
                out
            }
            Apdu::SetRequest(req) => {
                let mut out = service_header(tag::SET_REQUEST, req.invoke_id);
                push_descriptor(&mut out, req.descriptor.class_id, &req.descriptor.obis, req.descriptor.attribute_id);
                out.extend_from_slice(&AxdrEncoder::encode(&req.value));
                out
            }
            Apdu::SetResponse(resp) => {
                let mut out = service_header(tag::SET_RESPONSE, resp.invoke_id);
                out.push(resp.result);
                out
            }
            Apdu::ActionRequest(req) => {
                let mut out = service_header(tag::ACTION_REQUEST, req.invoke_id);
                push_descriptor(&mut out, req.descriptor.class_id, &req.descriptor.obis, req.descriptor.method_id);
                match &req.parameters {
                    Some(parameters) => {
                        out.push(0x01);
                        out.extend_from_slice(&AxdrEncoder::encode(parameters));
                    }
                    None => out.push(0x00),
                }
                out
            }
            Apdu::ActionResponse(resp) => {
                let mut out = service_header(tag::ACTION_RESPONSE, resp.invoke_id);
                out.push(resp.result);
                if let Some(data) = &resp.return_data {
                    out.extend_from_slice(&[0x01, 0x00]);
                    out.extend_from_slice(&AxdrEncoder::encode(data));
                }
                out
            }
        }
    }

    /// Decode an APDU, selecting the variant on the leading tag
    pub fn decode(bytes: &[u8]) -> DlmsResult<Self> {
        let (&first, rest) = bytes
            .split_first()
            .ok_or_else(|| DlmsError::InvalidData("empty APDU".to_string()))?;

        match first {
            tag::AARQ => Ok(Apdu::Aarq(AarqApdu::decode_body(acse_body(rest)?)?)),
            tag::AARE => Ok(Apdu::Aare(AareApdu::decode_body(acse_body(rest)?)?)),
            tag::RLRQ => Ok(Apdu::ReleaseRequest),
            tag::RLRE => Ok(Apdu::ReleaseResponse),
            tag::GET_REQUEST => {
                let mut reader = ServiceReader::new(rest)?;
                let (class_id, obis, attribute_id) = reader.descriptor()?;
                Ok(Apdu::GetRequest(GetRequest {
                    invoke_id: reader.invoke_id,
                    descriptor: AttributeDescriptor::new(class_id, obis, attribute_id),
                }))
            }
            tag::GET_RESPONSE => {
                let mut reader = ServiceReader::new(rest)?;
                let result = decode_get_data_result(&mut reader)?;
                Ok(Apdu::GetResponse(GetResponse {
                    invoke_id: reader.invoke_id,
                    result,
                }))
            }
            tag::SET_REQUEST => {
                let mut reader = ServiceReader::new(rest)?;
                let (class_id, obis, attribute_id) = reader.descriptor()?;
                let data = reader.remaining();
                // Skip an access-selection flag sent by peers that include one
                let data = if data.len() > 1 && data[0] == 0x00 { &data[1..] } else { data };
                let value = AxdrDecoder::new(data).decode_data_object()?;
                Ok(Apdu::SetRequest(SetRequest {
                    invoke_id: reader.invoke_id,
                    descriptor: AttributeDescriptor::new(class_id, obis, attribute_id),
                    value,
                }))
            }
            tag::SET_RESPONSE => {
                let mut reader = ServiceReader::new(rest)?;
                Ok(Apdu::SetResponse(SetResponse {
                    invoke_id: reader.invoke_id,
                    result: reader.byte()?,
                }))
            }
            tag::ACTION_REQUEST => {
                let mut reader = ServiceReader::new(rest)?;
                let (class_id, obis, method_id) = reader.descriptor()?;
                let parameters = match reader.remaining() {
                    [0x01, data @ ..] => Some(AxdrDecoder::new(data).decode_data_object()?),
                    _ => None,
                };
                Ok(Apdu::ActionRequest(ActionRequest {
                    invoke_id: reader.invoke_id,
                    descriptor: MethodDescriptor::new(class_id, obis, method_id),
                    parameters,
                }))
            }
            tag::ACTION_RESPONSE => {
                let mut reader = ServiceReader::new(rest)?;
                let result = reader.byte()?;
                let return_data = match reader.remaining() {
                    [0x01, 0x00, data @ ..] if !data.is_empty() => {
                        Some(AxdrDecoder::new(data).decode_response_value()?)
                    }
                    _ => None,
                };
                Ok(Apdu::ActionResponse(ActionResponse {
                    invoke_id: reader.invoke_id,
                    result,
                    return_data,
                }))
            }
            other => Err(DlmsError::UnknownApduTag(other)),
        }
    }
}

/// Decode a GET-response and return its value
///
/// Fails with `DataAccessError` when the meter reports a non-zero result.
pub fn parse_get_response(bytes: &[u8]) -> DlmsResult<DataObject> {
    match Apdu::decode(bytes)? {
        Apdu::GetResponse(resp) => resp.into_value(),
        other => Err(DlmsError::Protocol(format!(
            "expected GET-response, got {}",
            other.name()
        ))),
    }
}

/// Read the result/data part of a GET-response
///
/// The body is `result dar data`. The value is decoded only when both the
/// result and the data access result are zero; otherwise the first non-zero
/// of the two is reported.
fn decode_get_data_result(reader: &mut ServiceReader<'_>) -> DlmsResult<GetDataResult> {
    let result = reader.byte()?;
    if result != 0 {
        let code = reader.remaining().first().copied().filter(|&c| c != 0).unwrap_or(result);
        return Ok(GetDataResult::DataAccessError(code));
    }

    let data = match reader.remaining() {
        [] | [0x00] => return Ok(GetDataResult::Data(DataObject::Null)),
        [0x00, data @ ..] => data,
        [dar, ..] => return Ok(GetDataResult::DataAccessError(*dar)),
    };

    let value = AxdrDecoder::new(data).decode_response_value()?;
    Ok(GetDataResult::Data(value))
}

fn service_header(tag: u8, invoke_id: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&[tag, TYPE_NORMAL, invoke_id]);
    out
}

fn push_descriptor(out: &mut Vec<u8>, class_id: u16, obis: &ObisCode, index: u8) {
    out.extend_from_slice(&class_id.to_be_bytes());
    out.extend_from_slice(obis.as_bytes());
    out.push(index);
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    out.push(tag);
    encode_length(value.len(), out);
    out.extend_from_slice(value);
}

/// Strip the length of an ACSE APDU and return its body
fn acse_body(rest: &[u8]) -> DlmsResult<&[u8]> {
    let (len, consumed) = decode_length(rest)?;
    rest.get(consumed..consumed + len).ok_or_else(|| {
        DlmsError::InvalidData(format!(
            "ACSE APDU declares {} bytes, {} present",
            len,
            rest.len().saturating_sub(consumed)
        ))
    })
}

/// Value byte of `02 01 xx` or of a nested `A1 03 02 01 xx`
fn innermost_byte(value: &[u8]) -> DlmsResult<u8> {
    match TlvIter::new(value).next() {
        Some((0x02, inner)) => inner?
            .last()
            .copied()
            .ok_or_else(|| DlmsError::InvalidData("empty integer".to_string())),
        Some((_, inner)) => innermost_byte(inner?),
        None => value
            .last()
            .copied()
            .ok_or_else(|| DlmsError::InvalidData("empty value".to_string())),
    }
}

/// Iterator over `tag length value` triples
struct TlvIter<'a> {
    data: &'a [u8],
}

impl<'a> TlvIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = (u8, DlmsResult<&'a [u8]>);

    fn next(&mut self) -> Option<Self::Item> {
        let (&tag, rest) = self.data.split_first()?;
        let value = decode_length(rest).and_then(|(len, consumed)| {
            rest.get(consumed..consumed + len)
                .map(|value| (value, consumed + len))
                .ok_or_else(|| DlmsError::InvalidData(format!("TLV 0x{:02X} truncated", tag)))
        });
        match value {
            Ok((value, used)) => {
                self.data = &rest[used..];
                Some((tag, Ok(value)))
            }
            Err(err) => {
                self.data = &[];
                Some((tag, Err(err)))
            }
        }
    }
}

/// Reader over the body of a GET/SET/ACTION APDU after its tag
struct ServiceReader<'a> {
    data: &'a [u8],
    invoke_id: u8,
}

impl<'a> ServiceReader<'a> {
    fn new(body: &'a [u8]) -> DlmsResult<Self> {
        match body {
            [TYPE_NORMAL, invoke_id, rest @ ..] => Ok(Self {
                data: rest,
                invoke_id: *invoke_id,
            }),
            [kind, ..] => Err(DlmsError::Protocol(format!(
                "unsupported service type 0x{:02X}",
                kind
            ))),
            [] => Err(DlmsError::InvalidData("truncated service APDU".to_string())),
        }
    }

    fn byte(&mut self) -> DlmsResult<u8> {
        let (&byte, rest) = self
            .data
            .split_first()
            .ok_or_else(|| DlmsError::InvalidData("truncated service APDU".to_string()))?;
        self.data = rest;
        Ok(byte)
    }

    fn descriptor(&mut self) -> DlmsResult<(u16, ObisCode, u8)> {
        if self.data.len() < 9 {
            return Err(DlmsError::InvalidData(format!(
                "descriptor needs 9 bytes, {} present",
                self.data.len()
            )));
        }
        let class_id = u16::from_be_bytes([self.data[0], self.data[1]]);
        let mut obis = [0u8; 6];
        obis.copy_from_slice(&self.data[2..8]);
        let index = self.data[8];
        self.data = &self.data[9..];
        Ok((class_id, ObisCode::from_bytes(obis), index))
    }

    fn remaining(&self) -> &'a [u8] {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_core::datatypes::{Reading, ScalerUnit};

    fn voltage() -> ObisCode {
        ObisCode::new(1, 0, 32, 7, 0, 255)
    }

    #[test]
    fn test_aarq_without_authentication() {
        let aarq = AarqApdu::new(16, Authentication::None).encode();
        let mut expected = vec![0x60, 0x22];
        expected.extend_from_slice(&APPLICATION_CONTEXT_LN);
        expected.extend_from_slice(&[0xA6, 0x03, 0x02, 0x01, 0x10]);
        expected.extend_from_slice(&INITIATE_REQUEST);
        assert_eq!(aarq, expected);
        assert_eq!(aarq[1] as usize, aarq.len() - 2);
    }

    #[test]
    fn test_aarq_low_level_security() {
        let aarq = AarqApdu::new(16, Authentication::Low("12345678".to_string())).encode();
        assert_eq!(aarq[0], tag::AARQ);
        assert_eq!(aarq[1] as usize, aarq.len() - 2);
        let body = &aarq[2..];
        assert_eq!(&body[11..15], &ACSE_REQUIREMENTS);
        assert_eq!(&body[15..24], &[0x8B, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x01]);
        assert_eq!(&body[24..28], &[0xAC, 0x0A, 0x80, 0x08]);
        assert_eq!(&body[28..36], b"12345678");

        match Apdu::decode(&aarq).unwrap() {
            Apdu::Aarq(decoded) => {
                assert_eq!(decoded.client_id, 16);
                assert_eq!(decoded.authentication, Authentication::Low("12345678".to_string()));
                assert_eq!(decoded.meter_number(), None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_aarq_meter_number() {
        let aarq = AarqApdu::with_calling_title(Authentication::None, b"MTR0001").encode();
        let Apdu::Aarq(decoded) = Apdu::decode(&aarq).unwrap() else {
            panic!("expected AARQ");
        };
        assert_eq!(decoded.meter_number().as_deref(), Some("MTR0001"));

        let binary = AarqApdu::with_calling_title(Authentication::None, &[0x4D, 0x00, 0x12]);
        assert_eq!(binary.meter_number().as_deref(), Some("4D0012"));
    }

    #[test]
    fn test_aare() {
        let accepted = AareApdu::accepted().encode();
        assert_eq!(&accepted[13..18], &[0xA2, 0x03, 0x02, 0x01, 0x00]);
        assert_eq!(Apdu::decode(&accepted).unwrap(), Apdu::Aare(AareApdu::accepted()));

        let titled = AareApdu::accepted_with_title(&[0, 0, 0, 0, 0, 0, 0, 1]).encode();
        assert_eq!(titled[1] as usize, titled.len() - 2);
        assert_eq!(&titled[25..37], &[0xA4, 0x0A, 0x04, 0x08, 0, 0, 0, 0, 0, 0, 0, 1]);
        let Apdu::Aare(decoded) = Apdu::decode(&titled).unwrap() else {
            panic!("expected AARE");
        };
        assert_eq!(decoded.responding_title, Some(vec![0, 0, 0, 0, 0, 0, 0, 1]));

        let rejected = AareApdu::rejected(AssociationResult::RejectedPermanent, 13);
        let Apdu::Aare(decoded) = Apdu::decode(&rejected.encode()).unwrap() else {
            panic!("expected AARE");
        };
        assert!(!decoded.is_accepted());
        assert_eq!(decoded.diagnostic, 13);
    }

    #[test]
    fn test_release_shapes() {
        assert_eq!(Apdu::ReleaseRequest.encode(), vec![0x62, 0x03, 0x80, 0x01, 0x00]);
        assert_eq!(Apdu::ReleaseResponse.encode(), vec![0x63, 0x03, 0x80, 0x01, 0x00]);
        assert_eq!(Apdu::decode(&[0x63, 0x00]).unwrap(), Apdu::ReleaseResponse);
    }

    #[test]
    fn test_get_request_layout() {
        let apdu = Apdu::GetRequest(GetRequest {
            invoke_id: 7,
            descriptor: AttributeDescriptor::new(3, voltage(), 2),
        });
        let bytes = apdu.encode();
        assert_eq!(bytes, vec![0xC0, 0x01, 0x07, 0x00, 0x03, 0x01, 0x00, 0x20, 0x07, 0x00, 0xFF, 0x02]);
        assert_eq!(Apdu::decode(&bytes).unwrap(), apdu);
    }

    #[test]
    fn test_set_request_layout() {
        let apdu = Apdu::SetRequest(SetRequest {
            invoke_id: 1,
            descriptor: AttributeDescriptor::new(3, ObisCode::TOKEN_REGISTER, 2),
            value: DataObject::Unsigned32(1_000),
        });
        let bytes = apdu.encode();
        assert_eq!(&bytes[12..], &[0x06, 0x00, 0x00, 0x03, 0xE8]);
        assert_eq!(Apdu::decode(&bytes).unwrap(), apdu);

        let mut with_selection = bytes[..12].to_vec();
        with_selection.extend_from_slice(&[0x00, 0x06, 0x00, 0x00, 0x03, 0xE8]);
        assert_eq!(Apdu::decode(&with_selection).unwrap(), apdu);
    }

    #[test]
    fn test_action_request_layout() {
        let without = Apdu::ActionRequest(ActionRequest {
            invoke_id: 2,
            descriptor: MethodDescriptor::new(70, ObisCode::DISCONNECT_CONTROL, 1),
            parameters: None,
        });
        assert_eq!(*without.encode().last().unwrap(), 0x00);
        assert_eq!(Apdu::decode(&without.encode()).unwrap(), without);

        let with = Apdu::ActionRequest(ActionRequest {
            invoke_id: 2,
            descriptor: MethodDescriptor::new(70, ObisCode::DISCONNECT_CONTROL, 2),
            parameters: Some(DataObject::Integer8(0)),
        });
        let bytes = with.encode();
        assert_eq!(&bytes[12..], &[0x01, 0x0F, 0x00]);
        assert_eq!(Apdu::decode(&bytes).unwrap(), with);
    }

    #[test]
    fn test_get_response_with_scaler() {
        let bytes = [
            0xC4, 0x01, 0x05, 0x00, 0x00, 0x02, 0x02, 0x12, 0x08, 0xFC, 0x02, 0x02, 0x0F, 0xFF,
            0x16, 0x23,
        ];
        let value = parse_get_response(&bytes).unwrap();
        assert!((value.as_f64().unwrap() - 230.0).abs() < 1e-9);
    }

    #[test]
    fn test_get_response_dar_with_trailing_bytes() {
        assert_eq!(
            parse_get_response(&[0xC4, 0x01, 0x05, 0x00, 0x01, 0x00]),
            Err(DlmsError::DataAccessError(1))
        );
        assert_eq!(
            parse_get_response(&[0xC4, 0x01, 0x05, 0x00, 0x06, 0x00, 0x00, 0x01, 0x00]),
            Err(DlmsError::DataAccessError(6))
        );
    }

    #[test]
    fn test_get_response_access_errors() {
        assert_eq!(
            parse_get_response(&[0xC4, 0x01, 0x05, 0x00, 0x01]),
            Err(DlmsError::DataAccessError(1))
        );
        assert_eq!(
            parse_get_response(&[0xC4, 0x01, 0x05, 0x01, 0x04]),
            Err(DlmsError::DataAccessError(4))
        );
        let encoded = Apdu::GetResponse(GetResponse::error(9, DAR_OBJECT_UNAVAILABLE)).encode();
        assert_eq!(encoded, vec![0xC4, 0x01, 0x09, 0x01, 0x01]);
        assert_eq!(parse_get_response(&encoded), Err(DlmsError::DataAccessError(1)));
    }

    #[test]
    fn test_get_response_encoding() {
        let reading = DataObject::Reading(Reading::new(DataObject::Unsigned16(2300), ScalerUnit::new(-1, 35)));
        let encoded = Apdu::GetResponse(GetResponse::data(3, reading.clone())).encode();
        assert_eq!(&encoded[..5], &[0xC4, 0x01, 0x03, 0x00, 0x00]);
        assert_eq!(parse_get_response(&encoded).unwrap(), reading);
    }

    #[test]
    fn test_set_and_action_responses() {
        let Apdu::SetResponse(set) = Apdu::decode(&[0xC5, 0x01, 0x04, 0x03]).unwrap() else {
            panic!("expected SET-response");
        };
        assert_eq!(set.invoke_id, 4);
        assert_eq!(set.check(), Err(DlmsError::DataAccessError(3)));

        let Apdu::ActionResponse(action) = Apdu::decode(&[0xC7, 0x01, 0x04, 0x00]).unwrap() else {
            panic!("expected ACTION-response");
        };
        assert_eq!(action.into_value().unwrap(), DataObject::Null);

        let Apdu::ActionResponse(action) =
            Apdu::decode(&[0xC7, 0x01, 0x04, 0x00, 0x01, 0x00, 0x11, 0x2A]).unwrap()
        else {
            panic!("expected ACTION-response");
        };
        assert_eq!(action.return_data, Some(DataObject::Unsigned8(42)));
    }

    #[test]
    fn test_unknown_apdu_tag() {
        assert_eq!(Apdu::decode(&[0xD8, 0x01, 0x02]), Err(DlmsError::UnknownApduTag(0xD8)));
        assert!(Apdu::decode(&[]).is_err());
    }

    #[test]
    fn test_unknown_data_tag_inside_response() {
        let value = parse_get_response(&[0xC4, 0x01, 0x01, 0x00, 0x00, 0x55, 0x01]).unwrap();
        assert_eq!(value, DataObject::Unknown { tag: 0x55, raw: vec![0x01] });
    }
}
