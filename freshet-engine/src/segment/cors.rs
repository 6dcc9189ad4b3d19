/// CORS / crossdomain policy from the vhost's URL list.
///
/// List entries: `*` (allow everything), an exact origin
/// (`https://player.example.com`), a wildcard subdomain
/// (`http://*.example.com`), or a bare domain (expanded to both schemes).
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    allow_all: bool,
    origins: Vec<String>,
    crossdomain_xml: String,
}

impl CorsPolicy {
    #[must_use]
    pub fn new(url_list: &[String]) -> Self {
        let mut origins: Vec<String> = Vec::new();
        let mut domains: Vec<String> = Vec::new();
        let mut allow_all = url_list.is_empty();

        for url in url_list {
            if url == "*" {
                allow_all = true;
                origins.clear();
                domains.clear();
                break;
            }
            if let Some(rest) = url.strip_prefix("http://") {
                push_unique(&mut origins, url.clone());
                push_unique(&mut domains, rest.to_string());
            } else if let Some(rest) = url.strip_prefix("https://") {
                push_unique(&mut origins, url.clone());
                push_unique(&mut domains, rest.to_string());
            } else {
                push_unique(&mut origins, format!("http://{url}"));
                push_unique(&mut origins, format!("https://{url}"));
                push_unique(&mut domains, url.clone());
            }
        }

        let crossdomain_xml = build_crossdomain_xml(allow_all, &domains);

        Self {
            allow_all,
            origins,
            crossdomain_xml,
        }
    }

    /// The `Access-Control-Allow-Origin` value for `origin`, if allowed.
    #[must_use]
    pub fn allow_origin(&self, origin: &str) -> Option<String> {
        if self.allow_all {
            return Some("*".to_string());
        }
        let matched = self.origins.iter().any(|allowed| {
            if let Some(suffix) = allowed.strip_prefix("http://*") {
                origin.starts_with("http://") && origin.ends_with(suffix)
            } else if let Some(suffix) = allowed.strip_prefix("https://*") {
                origin.starts_with("https://") && origin.ends_with(suffix)
            } else {
                origin == allowed
            }
        });
        matched.then(|| origin.to_string())
    }

    #[must_use]
    pub fn crossdomain_xml(&self) -> &str {
        &self.crossdomain_xml
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

fn build_crossdomain_xml(allow_all: bool, domains: &[String]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?>\r\n<cross-domain-policy>\r\n");
    if allow_all {
        xml.push_str("    <allow-access-from domain=\"*\"/>\r\n");
    } else {
        for domain in domains {
            xml.push_str(&format!("    <allow-access-from domain=\"{domain}\"/>\r\n"));
        }
    }
    xml.push_str("</cross-domain-policy>");
    xml
}

#[cfg(test)]
mod tests {
    use super::CorsPolicy;

    #[test]
    fn test_wildcard_subdomain_matching() {
        let policy = CorsPolicy::new(&["http://*.example.com".to_string()]);
        assert_eq!(
            policy.allow_origin("http://x.example.com").as_deref(),
            Some("http://x.example.com")
        );
        assert!(policy.allow_origin("http://example.com.evil").is_none());
        assert!(policy.allow_origin("https://x.example.com").is_none());
    }

    #[test]
    fn test_exact_and_bare_domain() {
        let policy = CorsPolicy::new(&[
            "https://player.example.com".to_string(),
            "cdn.example.net".to_string(),
        ]);
        assert!(policy.allow_origin("https://player.example.com").is_some());
        assert!(policy.allow_origin("http://player.example.com").is_none());
        assert!(policy.allow_origin("http://cdn.example.net").is_some());
        assert!(policy.allow_origin("https://cdn.example.net").is_some());
    }

    #[test]
    fn test_empty_list_allows_everything() {
        let policy = CorsPolicy::new(&[]);
        assert_eq!(policy.allow_origin("http://anything").as_deref(), Some("*"));
        assert!(policy.crossdomain_xml().contains("domain=\"*\""));
    }

    #[test]
    fn test_crossdomain_xml_lists_domains() {
        let policy = CorsPolicy::new(&["http://*.example.com".to_string()]);
        assert!(policy.crossdomain_xml().contains("*.example.com"));
    }
}
