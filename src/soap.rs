//! Hand-rolled vim25 SOAP client, covering only the guest operations this
//! tool drives. Sessions are cookie-based: `Login` stores the session cookie
//! in the HTTP client's jar and every later call rides on it.

use std::time::Duration;

use crate::config::Config;
use crate::error::GomError;
use crate::vim::{
    GuestApi, GuestInfo, GuestProcess, SearchType, TransferTicket, VimFault, classify_identifier,
};

const VIM_NS: &str = "urn:vim25";
const SOAP_ACTION: &str = "urn:vim25/8.0.0.0";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Authenticated vCenter session scoped to one VM.
pub struct VimSession {
    http: reqwest::Client,
    sdk_url: String,
    /// vCenter hostname, substituted into wildcard transfer URLs.
    pub server: String,
    session_manager: String,
    property_collector: String,
    file_manager: String,
    process_manager: String,
    vm: String,
    guest_username: String,
    guest_password: String,
}

impl VimSession {
    /// Log in to vCenter, resolve the target VM and the guest operation
    /// managers. Fails eagerly so a bad identifier or credentials surface
    /// before any command is attempted.
    pub async fn connect(config: &Config) -> Result<Self, GomError> {
        let server = config.vcenter.server.clone();
        let host = config.guest.host.clone();

        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(HTTP_TIMEOUT);
        if config.vcenter.insecure {
            tracing::warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build().map_err(|e| GomError::Http {
            context: "building HTTPS client".into(),
            source: e,
        })?;

        let sdk_url = format!("https://{server}/sdk");

        let content = call(
            &http,
            &sdk_url,
            format!(
                r#"<RetrieveServiceContent xmlns="{VIM_NS}"><_this type="ServiceInstance">ServiceInstance</_this></RetrieveServiceContent>"#
            ),
        )
        .await?;
        let session_manager = required_ref(&content, "sessionManager")?;
        let search_index = required_ref(&content, "searchIndex")?;
        let guest_ops_manager = required_ref(&content, "guestOperationsManager")?;
        let property_collector = required_ref(&content, "propertyCollector")?;

        call(
            &http,
            &sdk_url,
            format!(
                r#"<Login xmlns="{VIM_NS}"><_this type="SessionManager">{session_manager}</_this><userName>{}</userName><password>{}</password></Login>"#,
                xml_escape(&config.vcenter.username),
                xml_escape(&config.vcenter.password),
            ),
        )
        .await?;
        tracing::debug!(%server, "logged in to vCenter");

        let search_type = classify_identifier(&host);
        let Some(vm) = find_vm(&http, &sdk_url, &search_index, &host, search_type).await? else {
            tracing::error!(
                %host,
                "could not find VM; check power status if searched via IP"
            );
            return Err(GomError::VmNotFound { host });
        };
        tracing::debug!(%vm, search = %host, search_type = search_type.as_str(), "found VM");

        let managers = retrieve_props(
            &http,
            &sdk_url,
            &property_collector,
            "GuestOperationsManager",
            &guest_ops_manager,
            &["fileManager", "processManager"],
        )
        .await?;
        let file_manager = required_prop(&managers, "fileManager")?;
        let process_manager = required_prop(&managers, "processManager")?;

        Ok(Self {
            http,
            sdk_url,
            server,
            session_manager,
            property_collector,
            file_manager,
            process_manager,
            vm,
            guest_username: config.guest.username.clone(),
            guest_password: config.guest.password.clone(),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Log out of vCenter. Further calls on this session will fault.
    pub async fn close(&self) -> Result<(), GomError> {
        call(
            &self.http,
            &self.sdk_url,
            format!(
                r#"<Logout xmlns="{VIM_NS}"><_this type="SessionManager">{}</_this></Logout>"#,
                self.session_manager
            ),
        )
        .await?;
        tracing::info!(server = %self.server, "closed vCenter session");
        Ok(())
    }

    async fn call(&self, body: String) -> Result<String, VimFault> {
        call(&self.http, &self.sdk_url, body).await
    }

    /// `NamePasswordAuthentication` element shared by every guest operation.
    fn auth_xml(&self) -> String {
        format!(
            r#"<auth xsi:type="NamePasswordAuthentication"><interactiveSession>false</interactiveSession><username>{}</username><password>{}</password></auth>"#,
            xml_escape(&self.guest_username),
            xml_escape(&self.guest_password),
        )
    }

    fn file_op(&self, op: &str, params: &str) -> String {
        format!(
            r#"<{op} xmlns="{VIM_NS}"><_this type="GuestFileManager">{}</_this><vm type="VirtualMachine">{}</vm>{}{params}</{op}>"#,
            self.file_manager,
            self.vm,
            self.auth_xml(),
        )
    }

    fn process_op(&self, op: &str, params: &str) -> String {
        format!(
            r#"<{op} xmlns="{VIM_NS}"><_this type="GuestProcessManager">{}</_this><vm type="VirtualMachine">{}</vm>{}{params}</{op}>"#,
            self.process_manager,
            self.vm,
            self.auth_xml(),
        )
    }
}

impl GuestApi for VimSession {
    async fn guest_info(&self) -> Result<GuestInfo, VimFault> {
        let props = retrieve_props(
            &self.http,
            &self.sdk_url,
            &self.property_collector,
            "VirtualMachine",
            &self.vm,
            &["guest.guestFamily", "config.guestId"],
        )
        .await?;
        Ok(GuestInfo {
            guest_family: prop(&props, "guest.guestFamily"),
            guest_id: prop(&props, "config.guestId"),
        })
    }

    async fn list_files(&self, path: &str) -> Result<(), VimFault> {
        self.call(self.file_op(
            "ListFilesInGuest",
            &format!("<filePath>{}</filePath>", xml_escape(path)),
        ))
        .await?;
        Ok(())
    }

    async fn create_temp_file(&self, prefix: &str, suffix: &str) -> Result<String, VimFault> {
        let resp = self
            .call(self.file_op(
                "CreateTemporaryFileInGuest",
                &format!(
                    "<prefix>{}</prefix><suffix>{}</suffix>",
                    xml_escape(prefix),
                    xml_escape(suffix),
                ),
            ))
            .await?;
        required_text(&resp, "returnval")
    }

    async fn initiate_transfer_to_guest(
        &self,
        path: &str,
        size: u64,
        overwrite: bool,
    ) -> Result<String, VimFault> {
        let resp = self
            .call(self.file_op(
                "InitiateFileTransferToGuest",
                &format!(
                    r#"<guestFilePath>{}</guestFilePath><fileAttributes xsi:type="GuestFileAttributes"/><fileSize>{size}</fileSize><overwrite>{overwrite}</overwrite>"#,
                    xml_escape(path),
                ),
            ))
            .await?;
        required_text(&resp, "returnval")
    }

    async fn initiate_transfer_from_guest(&self, path: &str) -> Result<TransferTicket, VimFault> {
        let resp = self
            .call(self.file_op(
                "InitiateFileTransferFromGuest",
                &format!("<guestFilePath>{}</guestFilePath>", xml_escape(path)),
            ))
            .await?;
        parse_transfer_info(&resp)
    }

    async fn delete_file(&self, path: &str) -> Result<(), VimFault> {
        self.call(self.file_op(
            "DeleteFileInGuest",
            &format!("<filePath>{}</filePath>", xml_escape(path)),
        ))
        .await?;
        Ok(())
    }

    async fn delete_directory(&self, path: &str, recursive: bool) -> Result<(), VimFault> {
        self.call(self.file_op(
            "DeleteDirectoryInGuest",
            &format!(
                "<directoryPath>{}</directoryPath><recursive>{recursive}</recursive>",
                xml_escape(path),
            ),
        ))
        .await?;
        Ok(())
    }

    async fn start_program(&self, program: &str, arguments: &str) -> Result<i64, VimFault> {
        let resp = self
            .call(self.process_op(
                "StartProgramInGuest",
                &format!(
                    "<spec><programPath>{}</programPath><arguments>{}</arguments></spec>",
                    xml_escape(program),
                    xml_escape(arguments),
                ),
            ))
            .await?;
        required_text(&resp, "returnval")?
            .parse()
            .map_err(|_| VimFault::new("InvalidResponse", "non-numeric pid in StartProgramInGuest"))
    }

    async fn list_processes(&self, pids: &[i64]) -> Result<Vec<GuestProcess>, VimFault> {
        let pid_params: String = pids.iter().map(|p| format!("<pids>{p}</pids>")).collect();
        let resp = self
            .call(self.process_op("ListProcessesInGuest", &pid_params))
            .await?;
        Ok(parse_processes(&resp))
    }
}

// ── Wire calls ───────────────────────────────────────────

async fn call(http: &reqwest::Client, sdk_url: &str, body: String) -> Result<String, VimFault> {
    let envelope = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><soapenv:Body>{body}</soapenv:Body></soapenv:Envelope>"#
    );

    let response = http
        .post(sdk_url)
        .header("content-type", "text/xml; charset=utf-8")
        .header("soapaction", SOAP_ACTION)
        .body(envelope)
        .send()
        .await
        .map_err(|e| VimFault::new("TransportError", e.to_string()))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| VimFault::new("TransportError", e.to_string()))?;

    // vCenter answers faults with HTTP 500, so inspect the body first.
    if text.contains(":Fault>") {
        return Err(parse_fault(&text));
    }
    if !status.is_success() {
        return Err(VimFault::new("TransportError", format!("HTTP {status}")));
    }
    Ok(text)
}

async fn find_vm(
    http: &reqwest::Client,
    sdk_url: &str,
    search_index: &str,
    host: &str,
    search_type: SearchType,
) -> Result<Option<String>, VimFault> {
    let needle = xml_escape(host);
    let body = match search_type {
        SearchType::Ip => format!(
            r#"<FindByIp xmlns="{VIM_NS}"><_this type="SearchIndex">{search_index}</_this><ip>{needle}</ip><vmSearch>true</vmSearch></FindByIp>"#
        ),
        SearchType::Uuid => format!(
            r#"<FindByUuid xmlns="{VIM_NS}"><_this type="SearchIndex">{search_index}</_this><uuid>{needle}</uuid><vmSearch>true</vmSearch></FindByUuid>"#
        ),
        SearchType::InventoryPath => format!(
            r#"<FindByInventoryPath xmlns="{VIM_NS}"><_this type="SearchIndex">{search_index}</_this><inventoryPath>{needle}</inventoryPath></FindByInventoryPath>"#
        ),
        SearchType::DnsName => format!(
            r#"<FindByDnsName xmlns="{VIM_NS}"><_this type="SearchIndex">{search_index}</_this><dnsName>{needle}</dnsName><vmSearch>true</vmSearch></FindByDnsName>"#
        ),
    };
    let resp = call(http, sdk_url, body).await?;
    Ok(tag_text(&resp, "returnval").map(xml_unescape))
}

/// Fetch named properties of one managed object.
async fn retrieve_props(
    http: &reqwest::Client,
    sdk_url: &str,
    collector: &str,
    obj_type: &str,
    obj: &str,
    paths: &[&str],
) -> Result<Vec<(String, String)>, VimFault> {
    let path_set: String = paths
        .iter()
        .map(|p| format!("<pathSet>{p}</pathSet>"))
        .collect();
    let body = format!(
        r#"<RetrievePropertiesEx xmlns="{VIM_NS}"><_this type="PropertyCollector">{collector}</_this><specSet><propSet><type>{obj_type}</type>{path_set}</propSet><objectSet><obj type="{obj_type}">{obj}</obj></objectSet></specSet><options/></RetrievePropertiesEx>"#
    );
    let resp = call(http, sdk_url, body).await?;
    Ok(parse_props(&resp))
}

// ── Response parsing ─────────────────────────────────────

fn parse_fault(xml: &str) -> VimFault {
    let message = tag_text(xml, "faultstring")
        .map(xml_unescape)
        .unwrap_or_else(|| "unknown fault".into());

    // The concrete fault type is the xsi:type of the element inside <detail>.
    let kind = tag_text(xml, "detail")
        .and_then(|detail| {
            let (_, rest) = detail.split_once("xsi:type=\"")?;
            let (kind, _) = rest.split_once('"')?;
            Some(kind.to_string())
        })
        .unwrap_or_else(|| "SoapFault".into());

    VimFault::new(kind, message)
}

fn parse_props(xml: &str) -> Vec<(String, String)> {
    tag_blocks(xml, "propSet")
        .into_iter()
        .filter_map(|block| {
            let name = tag_text(block, "name")?;
            let val = tag_text(block, "val")?;
            Some((xml_unescape(name), xml_unescape(val)))
        })
        .collect()
}

fn prop(props: &[(String, String)], name: &str) -> Option<String> {
    props
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
}

fn required_prop(props: &[(String, String)], name: &str) -> Result<String, VimFault> {
    prop(props, name)
        .ok_or_else(|| VimFault::new("InvalidResponse", format!("missing property {name}")))
}

fn required_ref(xml: &str, tag: &str) -> Result<String, VimFault> {
    required_text(xml, tag)
}

fn required_text(xml: &str, tag: &str) -> Result<String, VimFault> {
    tag_text(xml, tag)
        .map(xml_unescape)
        .ok_or_else(|| VimFault::new("InvalidResponse", format!("missing element {tag}")))
}

fn parse_transfer_info(xml: &str) -> Result<TransferTicket, VimFault> {
    let url = required_text(xml, "url")?;
    let size = required_text(xml, "size")?
        .parse()
        .map_err(|_| VimFault::new("InvalidResponse", "non-numeric size in transfer info"))?;
    Ok(TransferTicket { url, size })
}

fn parse_processes(xml: &str) -> Vec<GuestProcess> {
    tag_blocks(xml, "returnval")
        .into_iter()
        .filter_map(|block| {
            let pid = tag_text(block, "pid")?.parse().ok()?;
            let exit_code = tag_text(block, "exitCode").and_then(|c| c.parse().ok());
            Some(GuestProcess { pid, exit_code })
        })
        .collect()
}

// ── XML plumbing ─────────────────────────────────────────

pub(crate) fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Text content of the first non-self-closing `<tag>` element. Attributes on
/// the opening tag are skipped; nested same-name tags are not handled, which
/// the vim25 responses we read never produce.
fn tag_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut rest = xml;
    loop {
        let start = rest.find(&open)?;
        let after = &rest[start + open.len()..];
        match *after.as_bytes().first()? {
            b'>' => {
                let body = &after[1..];
                return Some(&body[..body.find(&close)?]);
            }
            b' ' | b'\t' | b'\r' | b'\n' => {
                let gt = after.find('>')?;
                if after.as_bytes()[gt - 1] == b'/' {
                    rest = &after[gt + 1..];
                    continue;
                }
                let body = &after[gt + 1..];
                return Some(&body[..body.find(&close)?]);
            }
            // Prefix of a longer tag name, keep scanning.
            _ => rest = after,
        }
    }
}

/// All bodies of repeated `<tag>` elements, in document order.
fn tag_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        let Some(&first) = after.as_bytes().first() else {
            break;
        };
        let body = match first {
            b'>' => &after[1..],
            b' ' | b'\t' | b'\r' | b'\n' => {
                let Some(gt) = after.find('>') else { break };
                if after.as_bytes()[gt - 1] == b'/' {
                    rest = &after[gt + 1..];
                    continue;
                }
                &after[gt + 1..]
            }
            // Prefix of a longer tag name, keep scanning.
            _ => {
                rest = after;
                continue;
            }
        };
        let Some(end) = body.find(&close) else { break };
        blocks.push(&body[..end]);
        rest = &body[end + close.len()..];
    }
    blocks
}

// ── Tests ────────────────────────────────────────────────
